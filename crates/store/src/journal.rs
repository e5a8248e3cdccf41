use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedIdRecord {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only JSONL journal of message ids that were folded into an
/// aggregate (or judged empty).  Replayed at startup to seed the ledger.
#[derive(Debug, Clone)]
pub struct IdJournal {
    path: PathBuf,
}

impl IdJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, ids: &[String], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut buf = String::new();
        for id in ids {
            let record = ProcessedIdRecord {
                id: id.clone(),
                recorded_at: now,
            };
            buf.push_str(&serde_json::to_string(&record)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        // Start on a fresh line when a crash left a torn record behind.
        let len = file.metadata().await?.len();
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                buf.insert(0, '\n');
            }
        }
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Read back every journaled id in write order.  Lines that do not parse
    /// (e.g. a torn final line after a crash) are skipped with a warning.
    pub async fn load(&self) -> Result<Vec<String>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        for (line_idx, line) in String::from_utf8_lossy(&bytes).lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ProcessedIdRecord>(line) {
                Ok(record) => ids.push(record.id),
                Err(err) => {
                    tracing::warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt ledger journal line, skipping"
                    );
                }
            }
        }
        Ok(ids)
    }
}
