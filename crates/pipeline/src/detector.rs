//! Source-file change detection.

use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// What a scan of the source file found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDecision {
    /// The file does not exist yet.
    NotReady,
    /// Same content as the last processed scan.
    Unchanged,
    /// New content; the fingerprint has already been advanced.
    Changed(String),
}

/// Content-hash gate in front of the parser.  Holds only the fingerprint of
/// the last scan that was let through.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last_fingerprint: Option<String>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.trim().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// `true` (recording the new fingerprint) when `raw` differs from the last
    /// processed content, `false` when it is identical.
    pub fn should_process(&mut self, raw: &str) -> bool {
        let fingerprint = Self::fingerprint(raw);
        if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return false;
        }
        self.last_fingerprint = Some(fingerprint);
        true
    }

    /// Read `path` and decide whether it needs processing.  A missing file is
    /// `NotReady`, not an error.  Invalid UTF-8 is replaced with U+FFFD.
    pub async fn scan(&mut self, path: &Path) -> io::Result<ScanDecision> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ScanDecision::NotReady),
            Err(err) => return Err(err),
        };
        let raw = String::from_utf8_lossy(&bytes).into_owned();

        if self.should_process(&raw) {
            Ok(ScanDecision::Changed(raw))
        } else {
            Ok(ScanDecision::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn first_call_processes_then_identical_content_skips() {
        let mut detector = ChangeDetector::new();
        assert!(detector.should_process("a,b\n1,2\n"));
        assert!(!detector.should_process("a,b\n1,2\n"));
        assert!(detector.should_process("a,b\n1,2\n3,4\n"));
    }

    #[test]
    fn surrounding_whitespace_does_not_count_as_change() {
        let mut detector = ChangeDetector::new();
        assert!(detector.should_process("a,b\n1,2"));
        assert!(!detector.should_process("\n a,b\n1,2 \n\n"));
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let fp = ChangeDetector::fingerprint("hello");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, ChangeDetector::fingerprint("  hello\n"));
    }

    #[tokio::test]
    async fn missing_file_is_not_ready_and_keeps_fingerprint_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("email_database.csv");
        let mut detector = ChangeDetector::new();
        assert_eq!(detector.scan(&path).await.unwrap(), ScanDecision::NotReady);

        std::fs::write(&path, "Category,Message-ID,Body\n").unwrap();
        assert!(matches!(detector.scan(&path).await.unwrap(), ScanDecision::Changed(_)));
        assert_eq!(detector.scan(&path).await.unwrap(), ScanDecision::Unchanged);
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("email_database.csv");
        std::fs::write(&path, b"Category,Message-ID,Body\nTech,<1>,caf\xE9 news\n").unwrap();

        let mut detector = ChangeDetector::new();
        match detector.scan(&path).await.unwrap() {
            ScanDecision::Changed(raw) => assert!(raw.contains("caf\u{FFFD} news")),
            other => panic!("expected changed content, got {other:?}"),
        }
        assert_eq!(detector.scan(&path).await.unwrap(), ScanDecision::Unchanged);
    }
}
