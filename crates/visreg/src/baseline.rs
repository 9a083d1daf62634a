//! On-disk baseline, actual and diff images.
//!
//! Layout:
//!
//! ```text
//! <baseline_dir>/<browser>/<test>/<name>.png
//! <output_dir>/actual/<browser>/<test>/<name>.png
//! <output_dir>/diff/<browser>/<test>/<name>_diff.png
//! ```
//!
//! Every write goes through a temporary file in the destination directory
//! that is renamed into place, so readers never observe a partial PNG.
//! Seeding refuses to replace an existing file; when several workers seed
//! the same baseline exactly one of them wins.

use crate::config::VisualConfig;
use crate::result::{VisregError, VisregResult};
use crate::snapshot::decode_png;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const ACTUAL_DIR: &str = "actual";
const DIFF_DIR: &str = "diff";
const PNG_EXT: &str = "png";
const DIFF_SUFFIX: &str = "_diff";

/// Map a name onto a filesystem-safe path segment.
///
/// Names made only of `[A-Za-z0-9._-]` are kept verbatim. Anything else has
/// the offending characters replaced with `_` and gets a `~` plus the first
/// eight hex digits of the SHA-256 of the raw name appended, so distinct
/// names never share a segment (`~` never survives verbatim).
///
/// # Errors
///
/// Returns [`VisregError::InvalidName`] for `.` and `..`
pub fn sanitize_segment(segment: &str) -> VisregResult<String> {
    if segment == "." || segment == ".." {
        return Err(VisregError::InvalidName {
            segment: segment.to_string(),
        });
    }
    let is_safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if !segment.is_empty() && segment.chars().all(is_safe) {
        return Ok(segment.to_string());
    }
    let mut sanitized: String = segment
        .chars()
        .map(|c| if is_safe(c) { c } else { '_' })
        .collect();
    let digest = Sha256::digest(segment.as_bytes());
    sanitized.push('~');
    for byte in &digest[..4] {
        sanitized.push_str(&format!("{byte:02x}"));
    }
    Ok(sanitized)
}

/// Identity of a snapshot: browser, test and snapshot name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    /// Browser or platform
    pub browser: String,
    /// Test name
    pub test_name: String,
    /// Snapshot name
    pub name: String,
}

impl SnapshotKey {
    /// Build a key, sanitising every segment
    pub fn new(
        browser: impl AsRef<str>,
        test_name: impl AsRef<str>,
        name: impl AsRef<str>,
    ) -> VisregResult<Self> {
        Ok(Self {
            browser: sanitize_segment(browser.as_ref())?,
            test_name: sanitize_segment(test_name.as_ref())?,
            name: sanitize_segment(name.as_ref())?,
        })
    }

    /// SHA-256 over `browser \0 test \0 name`, lowercase hex
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.browser.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.test_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.name.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn relative(&self, suffix: &str) -> PathBuf {
        PathBuf::from(&self.browser)
            .join(&self.test_name)
            .join(format!("{}{suffix}.{PNG_EXT}", self.name))
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.browser, self.test_name, self.name)
    }
}

/// Result of seeding a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// This call created the baseline
    Seeded,
    /// Another writer created it first; the existing file was kept
    AlreadySeeded,
}

/// A stored image and its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
    /// Snapshot identity
    pub key: SnapshotKey,
    /// File location
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: Option<DateTime<Utc>>,
}

/// Filesystem store for baselines and captures
#[derive(Debug, Clone)]
pub struct BaselineStore {
    baseline_dir: PathBuf,
    output_dir: PathBuf,
}

impl BaselineStore {
    /// Create a store over the given roots
    #[must_use]
    pub fn new(baseline_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            baseline_dir: baseline_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Create a store from configured directories
    #[must_use]
    pub fn from_config(config: &VisualConfig) -> Self {
        Self::new(&config.baseline_dir, &config.output_dir)
    }

    /// Root of baselines
    #[must_use]
    pub fn baseline_dir(&self) -> &Path {
        &self.baseline_dir
    }

    /// Root of actual and diff captures
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Baseline path for `key`
    #[must_use]
    pub fn resolve(&self, key: &SnapshotKey) -> PathBuf {
        self.baseline_dir.join(key.relative(""))
    }

    /// Actual capture path for `key`
    #[must_use]
    pub fn actual_path(&self, key: &SnapshotKey) -> PathBuf {
        self.output_dir.join(ACTUAL_DIR).join(key.relative(""))
    }

    /// Diff image path for `key`
    #[must_use]
    pub fn diff_path(&self, key: &SnapshotKey) -> PathBuf {
        self.output_dir.join(DIFF_DIR).join(key.relative(DIFF_SUFFIX))
    }

    /// Whether a file exists at `path`
    #[must_use]
    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Read PNG bytes
    pub fn read_bytes(&self, path: &Path) -> VisregResult<Vec<u8>> {
        fs::read(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                VisregError::BaselineMissing {
                    path: path.to_path_buf(),
                }
            } else {
                VisregError::Io(e)
            }
        })
    }

    /// Read and decode an image
    pub fn read(&self, path: &Path) -> VisregResult<RgbaImage> {
        decode_png(&self.read_bytes(path)?)
    }

    /// Atomically write `png` to `path`, replacing any existing file
    pub fn write(&self, path: &Path, png: &[u8], fingerprint: &str) -> VisregResult<()> {
        let temp = stage(path, png, fingerprint)?;
        temp.persist(path).map_err(|e| VisregError::Io(e.error))?;
        debug!(path = %path.display(), bytes = png.len(), "wrote image");
        Ok(())
    }

    /// Atomically create `path` from `png` unless it already exists
    pub fn seed(&self, path: &Path, png: &[u8], fingerprint: &str) -> VisregResult<SeedOutcome> {
        if path.is_file() {
            return Ok(SeedOutcome::AlreadySeeded);
        }
        let temp = stage(path, png, fingerprint)?;
        match temp.persist_noclobber(path) {
            Ok(_) => {
                debug!(path = %path.display(), "seeded baseline");
                Ok(SeedOutcome::Seeded)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "baseline seeded concurrently");
                Ok(SeedOutcome::AlreadySeeded)
            }
            Err(e) => Err(VisregError::Io(e.error)),
        }
    }

    /// Delete `path` if it exists
    pub fn remove_file(&self, path: &Path) -> VisregResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the baseline for `key`
    pub fn remove(&self, key: &SnapshotKey) -> VisregResult<bool> {
        self.remove_file(&self.resolve(key))
    }

    /// Replace the baseline for `key` with its actual capture
    pub fn promote(&self, key: &SnapshotKey) -> VisregResult<PathBuf> {
        let actual = self.actual_path(key);
        let png = fs::read(&actual).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                VisregError::config(format!("no actual capture at {}", actual.display()))
            } else {
                VisregError::Io(e)
            }
        })?;
        let baseline = self.resolve(key);
        self.write(&baseline, &png, &key.fingerprint())?;
        self.remove_file(&self.diff_path(key))?;
        Ok(baseline)
    }

    /// Every baseline, sorted by key
    pub fn list(&self) -> VisregResult<Vec<BaselineEntry>> {
        list_tree(&self.baseline_dir, "")
    }

    /// Every actual capture, sorted by key
    pub fn list_actual(&self) -> VisregResult<Vec<BaselineEntry>> {
        list_tree(&self.output_dir.join(ACTUAL_DIR), "")
    }

    /// Every diff image, sorted by key
    pub fn list_diffs(&self) -> VisregResult<Vec<BaselineEntry>> {
        list_tree(&self.output_dir.join(DIFF_DIR), DIFF_SUFFIX)
    }

    /// Remove the actual and diff trees, returning how many files were deleted
    pub fn clean_output(&self) -> VisregResult<usize> {
        let mut removed = 0;
        for dir in [ACTUAL_DIR, DIFF_DIR] {
            let root = self.output_dir.join(dir);
            if root.is_dir() {
                removed += list_tree(&root, if dir == DIFF_DIR { DIFF_SUFFIX } else { "" })?.len();
                fs::remove_dir_all(&root)?;
            }
        }
        Ok(removed)
    }
}

fn stage(path: &Path, png: &[u8], fingerprint: &str) -> VisregResult<tempfile::NamedTempFile> {
    let dir = path
        .parent()
        .ok_or_else(|| VisregError::config(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    let short = fingerprint.get(..16).unwrap_or(fingerprint);
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{short}-"))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(png)?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

fn list_tree(root: &Path, suffix: &str) -> VisregResult<Vec<BaselineEntry>> {
    let mut entries = Vec::new();
    for browser in subdirs(root)? {
        for test in subdirs(&browser)? {
            for file in fs::read_dir(&test)? {
                let path = file?.path();
                if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PNG_EXT) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Some(name) = stem.strip_suffix(suffix) else {
                    continue;
                };
                let metadata = fs::metadata(&path)?;
                entries.push(BaselineEntry {
                    key: SnapshotKey {
                        browser: file_name(&browser),
                        test_name: file_name(&test),
                        name: name.to_string(),
                    },
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                    path,
                });
            }
        }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

fn subdirs(dir: &Path) -> VisregResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::snapshot::encode_png;
    use image::Rgba;
    use tempfile::TempDir;

    fn png(color: u8) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(4, 4, Rgba([color, color, color, 255]))).unwrap()
    }

    fn store(dir: &TempDir) -> BaselineStore {
        BaselineStore::new(dir.path().join("baseline"), dir.path().join("out"))
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("v1.2-final_x").unwrap(), "v1.2-final_x");
        let spaced = sanitize_segment("login page").unwrap();
        assert!(spaced.starts_with("login_page~"));
        assert_eq!(spaced.len(), "login_page~".len() + 8);
        assert!(sanitize_segment("a/b\\c").unwrap().starts_with("a_b_c~"));
        assert!(sanitize_segment("").unwrap().starts_with('~'));
        assert!(matches!(
            sanitize_segment(".."),
            Err(VisregError::InvalidName { .. })
        ));
        assert!(sanitize_segment(".").is_err());
    }

    #[test]
    fn test_distinct_names_never_share_a_key() {
        let spaced = SnapshotKey::new("chromium", "login page", "x").unwrap();
        let underscored = SnapshotKey::new("chromium", "login_page", "x").unwrap();
        let slashed = SnapshotKey::new("chromium", "login/page", "x").unwrap();
        assert_ne!(spaced, underscored);
        assert_ne!(spaced, slashed);
        assert_ne!(spaced.fingerprint(), underscored.fingerprint());

        let store = BaselineStore::new("base", "out");
        assert_ne!(store.resolve(&spaced), store.resolve(&underscored));
        assert_eq!(
            store.resolve(&underscored),
            PathBuf::from("base/chromium/login_page/x.png")
        );
    }

    #[test]
    fn test_layout() {
        let store = BaselineStore::new("base", "out");
        let key = SnapshotKey::new("chromium", "checkout-flow", "cart").unwrap();
        assert_eq!(
            store.resolve(&key),
            PathBuf::from("base/chromium/checkout-flow/cart.png")
        );
        assert_eq!(
            store.actual_path(&key),
            PathBuf::from("out/actual/chromium/checkout-flow/cart.png")
        );
        assert_eq!(
            store.diff_path(&key),
            PathBuf::from("out/diff/chromium/checkout-flow/cart_diff.png")
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_separated() {
        let a = SnapshotKey::new("chromium", "ab", "c").unwrap();
        let b = SnapshotKey::new("chromium", "a", "bc").unwrap();
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_write_replaces_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = SnapshotKey::new("chromium", "t", "n").unwrap();
        let path = store.resolve(&key);

        store.write(&path, &png(10), &key.fingerprint()).unwrap();
        store.write(&path, &png(20), &key.fingerprint()).unwrap();

        assert_eq!(fs::read(&path).unwrap(), png(20));
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_seed_keeps_existing_baseline() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = SnapshotKey::new("chromium", "t", "n").unwrap();
        let path = store.resolve(&key);

        assert_eq!(
            store.seed(&path, &png(1), &key.fingerprint()).unwrap(),
            SeedOutcome::Seeded
        );
        assert_eq!(
            store.seed(&path, &png(2), &key.fingerprint()).unwrap(),
            SeedOutcome::AlreadySeeded
        );
        assert_eq!(fs::read(&path).unwrap(), png(1));
    }

    #[test]
    fn test_concurrent_seeding_has_one_winner() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = SnapshotKey::new("chromium", "race", "shot").unwrap();
        let path = store.resolve(&key);
        let candidates: Vec<Vec<u8>> = (0..8).map(|i| png(i * 30)).collect();

        let outcomes: Vec<SeedOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .iter()
                .map(|bytes| {
                    let store = &store;
                    let path = &path;
                    let fp = key.fingerprint();
                    scope.spawn(move || store.seed(path, bytes, &fp).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = outcomes
            .iter()
            .filter(|o| **o == SeedOutcome::Seeded)
            .count();
        assert_eq!(winners, 1);
        let stored = fs::read(&path).unwrap();
        assert!(candidates.contains(&stored));
    }

    #[test]
    fn test_read_missing_is_baseline_missing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = SnapshotKey::new("chromium", "t", "absent").unwrap();
        let err = store.read(&store.resolve(&key)).unwrap_err();
        assert!(matches!(err, VisregError::BaselineMissing { .. }));
    }

    #[test]
    fn test_list_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let b = SnapshotKey::new("chromium", "home", "b").unwrap();
        let a = SnapshotKey::new("chromium", "home", "a").unwrap();
        for key in [&b, &a] {
            store.write(&store.resolve(key), &png(5), &key.fingerprint()).unwrap();
        }

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, a);
        assert!(entries[0].size > 0);
        assert!(entries[0].modified.is_some());

        assert!(store.remove(&a).unwrap());
        assert!(!store.remove(&a).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_on_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).list().unwrap().is_empty());
    }

    #[test]
    fn test_promote_and_clean() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = SnapshotKey::new("firefox", "t", "hero").unwrap();
        let fp = key.fingerprint();
        store.write(&store.resolve(&key), &png(0), &fp).unwrap();
        store.write(&store.actual_path(&key), &png(99), &fp).unwrap();
        store.write(&store.diff_path(&key), &png(255), &fp).unwrap();

        assert_eq!(store.list_diffs().unwrap()[0].key, key);

        let promoted = store.promote(&key).unwrap();
        assert_eq!(fs::read(promoted).unwrap(), png(99));
        assert!(store.list_diffs().unwrap().is_empty());

        assert_eq!(store.clean_output().unwrap(), 1);
        assert!(store.list_actual().unwrap().is_empty());
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
