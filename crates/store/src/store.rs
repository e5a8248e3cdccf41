use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::aggregate::{CategoryAggregate, category_slug};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("{path} is not a valid aggregate document: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to persist {path}: {source}")]
    Persist { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Owner of the on-disk aggregate documents, one `<slug>.json` per category.
#[derive(Debug, Clone)]
pub struct AggregateStore {
    dir: PathBuf,
}

impl AggregateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the reports directory.  Called once at startup.
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Persist {
                path: self.dir.clone(),
                source,
            })
    }

    pub fn path_for(&self, category: &str) -> PathBuf {
        self.dir.join(format!("{}.json", category_slug(category)))
    }

    /// Load a category's aggregate.  A missing document yields an empty
    /// aggregate; a document that exists but does not parse is an error so the
    /// caller never overwrites accumulated entries with a fresh start.
    pub async fn load(&self, category: &str) -> Result<CategoryAggregate, StoreError> {
        let path = self.path_for(category);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(category, path = %path.display(), "no aggregate yet, starting empty");
                return Ok(CategoryAggregate::empty(category));
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let mut aggregate: CategoryAggregate =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        // The allow-list spelling is canonical even if an older document used
        // different casing.
        aggregate.category = category.to_string();
        Ok(aggregate)
    }

    /// Stamp `last_updated` and atomically replace the category's document.
    pub async fn persist(
        &self,
        aggregate: &mut CategoryAggregate,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        aggregate.last_updated = Some(now);
        let rendered = serde_json::to_string_pretty(aggregate)?;
        let path = self.path_for(&aggregate.category);
        write_atomic(&path, rendered.as_bytes())
            .await
            .map_err(|source| StoreError::Persist {
                path: path.clone(),
                source,
            })?;
        debug!(
            category = %aggregate.category,
            bytes = rendered.len(),
            path = %path.display(),
            "aggregate persisted"
        );
        Ok(path)
    }

    /// Every readable aggregate in the reports directory, sorted by category.
    /// Unreadable documents are logged and skipped.
    pub async fn list(&self) -> Result<Vec<CategoryAggregate>, StoreError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut aggregates = Vec::new();
        loop {
            let entry = dir.next_entry().await.map_err(|source| StoreError::Read {
                path: self.dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| err.to_string())
                .and_then(|raw| {
                    serde_json::from_str::<CategoryAggregate>(&raw).map_err(|err| err.to_string())
                });
            match parsed {
                Ok(aggregate) => aggregates.push(aggregate),
                Err(error) => warn!(path = %path.display(), %error, "skipping unreadable aggregate"),
            }
        }

        aggregates.sort_by(|a, b| a.category.to_lowercase().cmp(&b.category.to_lowercase()));
        Ok(aggregates)
    }
}

/// Replace `path` with `bytes` without ever exposing a partially written file.
///
/// The content goes to a `.tmp` sibling which is fsynced and then renamed over
/// the target.  A crash before the rename leaves the previous file untouched;
/// the `.tmp` file is removed on every error path.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let write_result: io::Result<()> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;

    if let Err(err) = write_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn load_missing_category_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = AggregateStore::new(dir.path());
        let agg = store.load("Tech").await.unwrap();
        assert_eq!(agg, CategoryAggregate::empty("Tech"));
        assert!(agg.is_new());
    }

    #[tokio::test]
    async fn persist_then_load_keeps_entries_and_synthesis() {
        let dir = TempDir::new().unwrap();
        let store = AggregateStore::new(dir.path());
        store.ensure_dir().await.unwrap();

        let mut agg = store.load("US News").await.unwrap();
        agg.merge_bodies(["X", "Y"], t0());
        agg.analysis = "two stories".to_string();
        agg.keywords = vec!["x".to_string(), "y".to_string()];
        let path = store.persist(&mut agg, t0()).await.unwrap();
        assert_eq!(path, dir.path().join("us_news.json"));

        let loaded = store.load("US News").await.unwrap();
        assert_eq!(loaded, agg);
        assert_eq!(loaded.last_updated, Some(t0()));
    }

    #[tokio::test]
    async fn persisted_document_is_indented_json() {
        let dir = TempDir::new().unwrap();
        let store = AggregateStore::new(dir.path());
        let mut agg = CategoryAggregate::empty("Tech");
        agg.merge_bodies(["X"], t0());
        let path = store.persist(&mut agg, t0()).await.unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("\n  \"category\": \"Tech\""));
        assert!(raw.contains("\"lastUpdated\""));
    }

    #[tokio::test]
    async fn persist_replaces_previous_document_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let store = AggregateStore::new(dir.path());
        let mut agg = CategoryAggregate::empty("Tech");
        agg.merge_bodies(["first"], t0());
        store.persist(&mut agg, t0()).await.unwrap();
        agg.merge_bodies(["second"], t0() + Duration::minutes(1));
        store.persist(&mut agg, t0() + Duration::minutes(1)).await.unwrap();

        let loaded = store.load("Tech").await.unwrap();
        assert_eq!(loaded.entries.len(), 2);
        assert!(!dir.path().join("tech.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error_not_an_empty_aggregate() {
        let dir = TempDir::new().unwrap();
        let store = AggregateStore::new(dir.path());
        std::fs::write(dir.path().join("tech.json"), "{ not json").unwrap();
        let err = store.load("Tech").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        // The damaged document is left for an operator to inspect.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tech.json")).unwrap(),
            "{ not json"
        );
    }

    #[tokio::test]
    async fn load_uses_allow_list_spelling() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("global_news.json"),
            r#"{"category":"global news","entries":[],"analysis":"","keywords":[]}"#,
        )
        .unwrap();
        let store = AggregateStore::new(dir.path());
        let agg = store.load("Global News").await.unwrap();
        assert_eq!(agg.category, "Global News");
    }

    #[tokio::test]
    async fn list_returns_sorted_aggregates_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let store = AggregateStore::new(dir.path());
        for name in ["Tech", "finance"] {
            let mut agg = CategoryAggregate::empty(name);
            store.persist(&mut agg, t0()).await.unwrap();
        }
        std::fs::write(dir.path().join("broken.json"), "nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|agg| agg.category)
            .collect();
        assert_eq!(names, vec!["finance", "Tech"]);
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = AggregateStore::new(dir.path().join("missing"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/out.txt");
        write_atomic(&path, b"hello").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }
}
