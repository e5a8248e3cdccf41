//! Partition new rows by recognized category.

use std::collections::HashMap;

use tracing::{debug, warn};

use digest_store::category_slug;

use crate::ledger::{DeduplicationLedger, normalize_id};
use crate::records::SourceRecord;

/// Injected set of recognized category labels.  Matching is
/// case-insensitive on the trimmed label and resolves to the configured
/// spelling.
#[derive(Debug, Clone)]
pub struct CategoryAllowList {
    labels: Vec<String>,
}

impl CategoryAllowList {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into().trim().to_string();
            if label.is_empty() {
                continue;
            }
            // Two labels with the same slug would share one document.
            let slug = category_slug(&label);
            match unique.iter().find(|kept| category_slug(kept) == slug) {
                Some(kept) => {
                    if !kept.eq_ignore_ascii_case(&label) {
                        warn!(%label, %kept, %slug, "category label collides with an earlier one, ignoring");
                    }
                }
                None => unique.push(label),
            }
        }
        Self { labels: unique }
    }

    pub fn resolve(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        self.labels
            .iter()
            .find(|label| label.eq_ignore_ascii_case(raw))
            .map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMessage {
    /// Normalized message id.
    pub message_id: String,
    pub body: String,
}

/// New content for one category, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryBatch {
    pub category: String,
    pub messages: Vec<AcceptedMessage>,
}

impl CategoryBatch {
    pub fn bodies(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|message| message.body.as_str())
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|message| message.message_id.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Grouping {
    /// One batch per category, ordered by first arrival.
    pub batches: Vec<CategoryBatch>,
    /// Ids of accepted rows whose body was blank.  Marked processed but
    /// carrying no content.
    pub empty_ids: Vec<String>,
    pub malformed: usize,
    pub unrecognized: usize,
    pub duplicates: usize,
}

impl Grouping {
    pub fn accepted(&self) -> usize {
        self.batches.iter().map(|batch| batch.messages.len()).sum::<usize>() + self.empty_ids.len()
    }
}

/// Filter and bucket `records`.  Surviving ids are marked in `ledger` as they
/// are accepted, so a repeated id later in the same scan counts as a
/// duplicate.
pub fn group_records<I>(
    records: I,
    allow: &CategoryAllowList,
    ledger: &mut DeduplicationLedger,
) -> Grouping
where
    I: IntoIterator<Item = SourceRecord>,
{
    let mut grouping = Grouping::default();
    let mut batch_index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let SourceRecord {
            category: Some(category),
            message_id: Some(raw_id),
            body: Some(body),
        } = record
        else {
            grouping.malformed += 1;
            continue;
        };

        let message_id = normalize_id(&raw_id);
        if category.trim().is_empty() || message_id.is_empty() {
            grouping.malformed += 1;
            continue;
        }

        let Some(label) = allow.resolve(&category) else {
            debug!(category = %category.trim(), "dropping row with unrecognized category");
            grouping.unrecognized += 1;
            continue;
        };

        if !ledger.mark_processed(&message_id) {
            grouping.duplicates += 1;
            continue;
        }

        if body.trim().is_empty() {
            debug!(message_id = %message_id, "accepted row has no content");
            grouping.empty_ids.push(message_id);
            continue;
        }

        let idx = *batch_index.entry(label.to_string()).or_insert_with(|| {
            grouping.batches.push(CategoryBatch {
                category: label.to_string(),
                messages: Vec::new(),
            });
            grouping.batches.len() - 1
        });
        grouping.batches[idx].messages.push(AcceptedMessage { message_id, body });
    }

    grouping
}
