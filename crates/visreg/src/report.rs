//! Report attachments.
//!
//! A [`ReportSink`] receives the expected, actual and diff images plus a
//! JSON summary for every comparison. Failures come back as
//! [`ReportingError`]; the comparator decides whether they matter.

use crate::baseline::sanitize_segment;
use crate::comparator::ComparisonResult;
use crate::result::ReportingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// MIME type of PNG attachments
pub const CONTENT_TYPE_PNG: &str = "image/png";
/// MIME type of JSON attachments
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Name of the per-test attachment index
pub const INDEX_FILE: &str = "attachments.json";

/// A named artifact attached to a test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Owning test
    pub test_name: String,
    /// Attachment name, e.g. `hero-diff.png`
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// Raw bytes
    pub body: Vec<u8>,
}

impl Attachment {
    /// PNG attachment
    #[must_use]
    pub fn png(test_name: impl Into<String>, name: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            test_name: test_name.into(),
            name: name.into(),
            content_type: CONTENT_TYPE_PNG.to_string(),
            body,
        }
    }

    /// JSON attachment
    #[must_use]
    pub fn json(test_name: impl Into<String>, name: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            test_name: test_name.into(),
            name: name.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            body,
        }
    }
}

/// Destination for attachments
pub trait ReportSink {
    /// Store one attachment
    ///
    /// # Errors
    ///
    /// Returns [`ReportingError`] if the attachment cannot be stored
    fn attach(&mut self, attachment: Attachment) -> Result<(), ReportingError>;
}

/// One row of `attachments.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Attachment name
    pub name: String,
    /// MIME type
    pub content_type: String,
    /// File path relative to the test directory
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// When the attachment was written
    pub timestamp: DateTime<Utc>,
}

/// Writes attachments under `<root>/<test>/` with an index per test
#[derive(Debug, Clone)]
pub struct DirectoryReport {
    root: PathBuf,
}

impl DirectoryReport {
    /// Report rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Report root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a test's attachments
    #[must_use]
    pub fn test_dir(&self, test_name: &str) -> PathBuf {
        let segment = sanitize_segment(test_name).unwrap_or_else(|_| String::from("_"));
        self.root.join(segment)
    }

    /// Read a test's attachment index, empty if none exists
    ///
    /// # Errors
    ///
    /// Returns [`ReportingError`] if the index exists but cannot be read
    pub fn index(&self, test_name: &str) -> Result<Vec<IndexEntry>, ReportingError> {
        let path = self.test_dir(test_name).join(INDEX_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path).map_err(|source| ReportingError::Io {
            attachment: INDEX_FILE.to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ReportingError::Serialize {
            attachment: INDEX_FILE.to_string(),
            source,
        })
    }
}

impl ReportSink for DirectoryReport {
    fn attach(&mut self, attachment: Attachment) -> Result<(), ReportingError> {
        let io_err = |source: std::io::Error| ReportingError::Io {
            attachment: attachment.name.clone(),
            source,
        };
        let dir = self.test_dir(&attachment.test_name);
        fs::create_dir_all(&dir).map_err(io_err)?;

        let safe_name = sanitize_segment(&attachment.name).unwrap_or_else(|_| String::from("_"));
        let file_name = format!("{}-{safe_name}", Uuid::new_v4());
        fs::write(dir.join(&file_name), &attachment.body).map_err(io_err)?;

        let mut index = self.index(&attachment.test_name)?;
        index.push(IndexEntry {
            name: attachment.name.clone(),
            content_type: attachment.content_type.clone(),
            path: file_name,
            size: attachment.body.len() as u64,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_vec_pretty(&index).map_err(|source| {
            ReportingError::Serialize {
                attachment: attachment.name.clone(),
                source,
            }
        })?;
        fs::write(dir.join(INDEX_FILE), json).map_err(io_err)?;
        Ok(())
    }
}

/// Keeps attachments in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReport {
    attachments: Vec<Attachment>,
}

impl MemoryReport {
    /// Empty report
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything attached so far
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Attachment names in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.attachments.iter().map(|a| a.name.as_str()).collect()
    }
}

impl ReportSink for MemoryReport {
    fn attach(&mut self, attachment: Attachment) -> Result<(), ReportingError> {
        self.attachments.push(attachment);
        Ok(())
    }
}

/// Attach expected, actual, diff (when present) and summary for a comparison.
///
/// Every attachment is attempted; the first failure is returned.
///
/// # Errors
///
/// Returns the first [`ReportingError`] raised by the sink
pub fn attach_comparison(
    sink: &mut dyn ReportSink,
    result: &ComparisonResult,
    baseline_png: &[u8],
    actual_png: &[u8],
    diff_png: Option<&[u8]>,
) -> Result<(), ReportingError> {
    let test = &result.key.test_name;
    let name = &result.key.name;

    let mut attachments = vec![
        Attachment::png(test, format!("{name}-expected.png"), baseline_png.to_vec()),
        Attachment::png(test, format!("{name}-actual.png"), actual_png.to_vec()),
    ];
    if let Some(diff) = diff_png {
        attachments.push(Attachment::png(test, format!("{name}-diff.png"), diff.to_vec()));
    }
    let summary_name = format!("{name}-summary.json");
    let summary = serde_json::to_vec_pretty(result).map_err(|source| {
        ReportingError::Serialize {
            attachment: summary_name.clone(),
            source,
        }
    })?;
    attachments.push(Attachment::json(test, summary_name, summary));

    let mut first_error = None;
    for attachment in attachments {
        if let Err(e) = sink.attach(attachment) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::baseline::SnapshotKey;
    use crate::comparator::BaselineStatus;
    use tempfile::TempDir;

    fn result(diff_pixels: u64) -> ComparisonResult {
        let key = SnapshotKey::new("chromium", "checkout", "cart").unwrap();
        ComparisonResult {
            key_fingerprint: key.fingerprint(),
            key,
            passed: diff_pixels == 0,
            diff_pixel_count: diff_pixels,
            total_pixels: 100,
            diff_percentage: diff_pixels as f64,
            max_color_delta: 0.0,
            baseline_status: BaselineStatus::Compared,
            baseline_path: PathBuf::from("b.png"),
            actual_path: PathBuf::from("a.png"),
            diff_path: None,
        }
    }

    struct FailingSink {
        calls: usize,
    }

    impl ReportSink for FailingSink {
        fn attach(&mut self, attachment: Attachment) -> Result<(), ReportingError> {
            self.calls += 1;
            Err(ReportingError::Io {
                attachment: attachment.name,
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[test]
    fn test_attach_comparison_without_diff() {
        let mut sink = MemoryReport::new();
        attach_comparison(&mut sink, &result(0), b"base", b"act", None).unwrap();
        assert_eq!(
            sink.names(),
            vec!["cart-expected.png", "cart-actual.png", "cart-summary.json"]
        );
        assert_eq!(sink.attachments()[0].content_type, CONTENT_TYPE_PNG);
        assert_eq!(sink.attachments()[2].content_type, CONTENT_TYPE_JSON);
        assert_eq!(sink.attachments()[0].test_name, "checkout");
    }

    #[test]
    fn test_attach_comparison_with_diff_and_summary() {
        let mut sink = MemoryReport::new();
        attach_comparison(&mut sink, &result(5), b"base", b"act", Some(b"diff")).unwrap();
        assert_eq!(sink.attachments().len(), 4);
        assert_eq!(sink.attachments()[2].name, "cart-diff.png");
        assert_eq!(sink.attachments()[2].body, b"diff");

        let summary: serde_json::Value =
            serde_json::from_slice(&sink.attachments()[3].body).unwrap();
        assert_eq!(summary["diff_pixel_count"], 5);
        assert_eq!(summary["passed"], false);
    }

    #[test]
    fn test_attach_comparison_attempts_all_and_returns_first_error() {
        let mut sink = FailingSink { calls: 0 };
        let err = attach_comparison(&mut sink, &result(1), b"b", b"a", Some(b"d")).unwrap_err();
        assert_eq!(sink.calls, 4);
        assert_eq!(err.attachment(), "cart-expected.png");
    }

    #[test]
    fn test_directory_report_writes_files_and_index() {
        let dir = TempDir::new().unwrap();
        let mut report = DirectoryReport::new(dir.path());
        report
            .attach(Attachment::png("my test", "hero-actual.png", vec![1, 2, 3]))
            .unwrap();
        report
            .attach(Attachment::json("my test", "hero-summary.json", b"{}".to_vec()))
            .unwrap();

        let index = report.index("my test").unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].name, "hero-actual.png");
        assert_eq!(index[0].size, 3);
        assert!(index[0].path.ends_with("-hero-actual.png"));

        let test_dir = report.test_dir("my test");
        assert!(test_dir.ends_with("my_test"));
        assert_eq!(fs::read(test_dir.join(&index[0].path)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_directory_report_unwritable_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let mut report = DirectoryReport::new(&blocker);
        let err = report
            .attach(Attachment::png("t", "x.png", vec![0]))
            .unwrap_err();
        assert!(matches!(err, ReportingError::Io { .. }));
        assert_eq!(err.attachment(), "x.png");
    }

    #[test]
    fn test_index_of_unknown_test_is_empty() {
        let dir = TempDir::new().unwrap();
        let report = DirectoryReport::new(dir.path());
        assert!(report.index("nothing").unwrap().is_empty());
    }
}
