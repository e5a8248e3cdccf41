//! Message-id deduplication ledger.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use digest_store::IdJournal;

/// Canonical form of a message id: newlines removed, surrounding whitespace
/// trimmed, one layer of surrounding `'`/`"` stripped.
pub fn normalize_id(raw: &str) -> String {
    let joined: String = raw.chars().filter(|c| !matches!(c, '\n' | '\r')).collect();
    let trimmed = joined.trim();
    let trimmed = trimmed.strip_prefix(['"', '\'']).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(['"', '\'']).unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Set of message ids already folded into an aggregate.  Grows only.
///
/// Marking is in-memory and happens when a row is accepted into a group.
/// With a journal attached, [`commit`](Self::commit) makes ids durable once
/// their category has been persisted, and the journal is replayed on start.
#[derive(Debug, Default)]
pub struct DeduplicationLedger {
    seen: HashSet<String>,
    journal: Option<IdJournal>,
}

impl DeduplicationLedger {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Seed the ledger from `journal` and keep appending to it.
    pub async fn with_journal(journal: IdJournal) -> Result<Self> {
        let seen: HashSet<String> = journal.load().await?.into_iter().collect();
        info!(
            ids = seen.len(),
            path = %journal.path().display(),
            "ledger restored from journal"
        );
        Ok(Self {
            seen,
            journal: Some(journal),
        })
    }

    pub fn is_new(&self, id: &str) -> bool {
        !self.seen.contains(&normalize_id(id))
    }

    /// Record `id` as processed.  Returns `false` when it was already known.
    pub fn mark_processed(&mut self, id: &str) -> bool {
        self.seen.insert(normalize_id(id))
    }

    /// Durably record already-marked, normalized ids.  No-op without a journal.
    pub async fn commit(&self, ids: &[String]) -> Result<()> {
        match &self.journal {
            Some(journal) => journal.append(ids, Utc::now()).await,
            None => Ok(()),
        }
    }

    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
