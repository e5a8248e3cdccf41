//! CSV rows as the pipeline sees them.

use anyhow::{Result, bail};
use tracing::debug;

pub const CATEGORY_COLUMN: &str = "Category";
pub const MESSAGE_ID_COLUMN: &str = "Message-ID";
pub const BODY_COLUMN: &str = "Body";

/// One parsed row.  A field is `None` when the row is too short to carry it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRecord {
    pub category: Option<String>,
    pub message_id: Option<String>,
    pub body: Option<String>,
}

impl SourceRecord {
    pub fn new(category: &str, message_id: &str, body: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            message_id: Some(message_id.to_string()),
            body: Some(body.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ParsedRecords {
    pub records: Vec<SourceRecord>,
    /// Rows the tokenizer could not read at all.
    pub unreadable: usize,
}

/// Parse the whole source file.  The header must name the category,
/// message-id and body columns; other columns are ignored.
pub fn parse_records(csv_text: &str) -> Result<ParsedRecords> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(csv_text.as_bytes());

    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
    };
    let (Some(category_idx), Some(id_idx), Some(body_idx)) = (
        column(CATEGORY_COLUMN),
        column(MESSAGE_ID_COLUMN),
        column(BODY_COLUMN),
    ) else {
        bail!(
            "source CSV header must contain {CATEGORY_COLUMN}, {MESSAGE_ID_COLUMN} and {BODY_COLUMN} columns"
        );
    };

    let mut parsed = ParsedRecords::default();
    for (row_idx, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                debug!(row = row_idx + 1, error = %err, "unreadable CSV row");
                parsed.unreadable += 1;
                continue;
            }
        };

        let record = SourceRecord {
            category: row.get(category_idx).map(str::to_string),
            message_id: row.get(id_idx).map(str::to_string),
            body: row.get(body_idx).map(str::to_string),
        };

        // A header line that was appended again mid-file.
        if record.category.as_deref() == Some(CATEGORY_COLUMN)
            && record.message_id.as_deref() == Some(MESSAGE_ID_COLUMN)
        {
            continue;
        }
        parsed.records.push(record);
    }

    Ok(parsed)
}
