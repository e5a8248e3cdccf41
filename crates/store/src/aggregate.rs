use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved delimiter between items of one body and between entries when the
/// accumulated content is handed to the synthesizer.
pub const ENTRY_SEPARATOR: &str = "\n\n<<<ENTRY>>>\n\n";

/// One accumulated piece of category content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted per-category document.
///
/// `entries` is append-only: a merge never reorders or drops existing
/// entries and never appends content that is already present.  `analysis`
/// and `keywords` are replaced wholesale on every successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAggregate {
    pub category: String,
    #[serde(default)]
    pub entries: Vec<AggregateEntry>,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CategoryAggregate {
    pub fn empty(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            entries: Vec::new(),
            analysis: String::new(),
            keywords: Vec::new(),
            last_updated: None,
        }
    }

    /// `true` until the first successful persist.
    pub fn is_new(&self) -> bool {
        self.last_updated.is_none() && self.entries.is_empty()
    }

    /// Append the items of `bodies` that are not yet present, stamped with
    /// `now`.  Returns how many entries were appended.
    pub fn merge_bodies<I, S>(&mut self, bodies: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: HashSet<String> = self
            .entries
            .iter()
            .map(|entry| entry.content.clone())
            .collect();
        let before = self.entries.len();

        for body in bodies {
            for item in split_entries(body.as_ref()) {
                if seen.insert(item.to_string()) {
                    self.entries.push(AggregateEntry {
                        content: item.to_string(),
                        timestamp: now,
                    });
                }
            }
        }

        self.entries.len() - before
    }

    /// Every entry's content joined by [`ENTRY_SEPARATOR`], oldest first.
    pub fn full_content(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.content.as_str())
            .collect::<Vec<_>>()
            .join(ENTRY_SEPARATOR)
    }
}

/// Split a body on [`ENTRY_SEPARATOR`], trimming items and dropping blanks.
pub fn split_entries(body: &str) -> impl Iterator<Item = &str> {
    body.split(ENTRY_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// File stem for a category: lower-cased, whitespace runs collapsed to `_`,
/// path separators and leading dots removed.
pub fn category_slug(category: &str) -> String {
    let slug = category
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect::<String>();
    let slug = slug.trim_start_matches('.');
    if slug.is_empty() {
        "uncategorized".to_string()
    } else {
        slug.to_string()
    }
}
