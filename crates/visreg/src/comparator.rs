//! The comparison pipeline.
//!
//! [`VisualComparator`] ties the pieces together: capture a snapshot, store
//! it as the actual image, seed or load the baseline, diff, apply the verdict
//! policy, write the diff image and attach everything to the report.
//!
//! A visual mismatch is data (`passed == false`). Precondition failures
//! (timeouts, dimension mismatches, missing baselines in CI mode) are errors.

use crate::baseline::{BaselineStore, SeedOutcome, SnapshotKey};
use crate::capture::{CapturePage, CaptureRequest, Capturer};
use crate::config::{ReportingFailurePolicy, UpdateMode, VisualConfig};
use crate::differ::{compared_pixel_count, DiffOutput, ImageDiffer};
use crate::geometry::{MaskTarget, Region, Viewport};
use crate::options::{ResolvedOptions, SnapshotOptions};
use crate::report::{attach_comparison, ReportSink};
use crate::result::{VisregError, VisregResult};
use crate::snapshot::{decode_png, encode_png, Snapshot};
use crate::verdict::Verdict;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, info_span, warn};

/// What happened to the baseline during a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    /// Compared against an existing baseline
    Compared,
    /// No baseline existed; the capture became the baseline
    Created,
    /// The baseline was overwritten with the capture
    Updated,
}

/// Outcome of one snapshot comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Snapshot identity
    pub key: SnapshotKey,
    /// Content-addressed identity of the key
    pub key_fingerprint: String,
    /// Whether the capture is within tolerance
    pub passed: bool,
    /// Number of differing pixels
    pub diff_pixel_count: u64,
    /// Number of compared (unmasked) pixels
    pub total_pixels: u64,
    /// Percentage of compared pixels that differ (0.0-100.0)
    pub diff_percentage: f64,
    /// Largest colour delta seen
    pub max_color_delta: f64,
    /// Baseline handling
    pub baseline_status: BaselineStatus,
    /// Baseline file
    pub baseline_path: PathBuf,
    /// Actual capture file
    pub actual_path: PathBuf,
    /// Diff image, written only when pixels differ
    pub diff_path: Option<PathBuf>,
}

impl ComparisonResult {
    /// Turn a failed comparison into [`VisregError::ThresholdExceeded`]
    ///
    /// # Errors
    ///
    /// Returns an error if `passed` is false
    pub fn assert_passed(&self) -> VisregResult<()> {
        if self.passed {
            Ok(())
        } else {
            Err(VisregError::ThresholdExceeded {
                name: self.key.to_string(),
                diff_pixels: self.diff_pixel_count,
                diff_percentage: self.diff_percentage,
            })
        }
    }

    fn seeded(key: &SnapshotKey, paths: &Paths, pixels: u64, status: BaselineStatus) -> Self {
        Self {
            key: key.clone(),
            key_fingerprint: key.fingerprint(),
            passed: true,
            diff_pixel_count: 0,
            total_pixels: pixels,
            diff_percentage: 0.0,
            max_color_delta: 0.0,
            baseline_status: status,
            baseline_path: paths.baseline.clone(),
            actual_path: paths.actual.clone(),
            diff_path: None,
        }
    }
}

/// Diff and verdict for a pair of rasters
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Pixel diff
    pub diff: DiffOutput,
    /// Pass/fail decision
    pub verdict: Verdict,
}

/// Diff `actual` against `baseline` and apply the resolved policy
///
/// # Errors
///
/// Returns [`VisregError::DimensionMismatch`] if the images differ in size
pub fn evaluate(
    baseline: &RgbaImage,
    actual: &RgbaImage,
    masks: &[Region],
    options: &ResolvedOptions,
) -> VisregResult<Evaluation> {
    let diff = ImageDiffer::new(options.color_threshold).diff(baseline, actual, masks)?;
    let verdict = options.policy.evaluate(&diff.summary);
    Ok(Evaluation { diff, verdict })
}

struct Paths {
    baseline: PathBuf,
    actual: PathBuf,
    diff: PathBuf,
}

impl Paths {
    fn new(store: &BaselineStore, key: &SnapshotKey) -> Self {
        Self {
            baseline: store.resolve(key),
            actual: store.actual_path(key),
            diff: store.diff_path(key),
        }
    }
}

/// Captures, stores and compares snapshots
pub struct VisualComparator {
    config: VisualConfig,
    store: BaselineStore,
    capturer: Capturer,
    reporter: Option<Mutex<Box<dyn ReportSink + Send>>>,
}

impl std::fmt::Debug for VisualComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualComparator")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("capturer", &self.capturer)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

impl VisualComparator {
    /// Comparator over the configured directories
    #[must_use]
    pub fn new(config: VisualConfig) -> Self {
        Self {
            store: BaselineStore::from_config(&config),
            config,
            capturer: Capturer::default(),
            reporter: None,
        }
    }

    /// Use a custom capturer
    #[must_use]
    pub const fn with_capturer(mut self, capturer: Capturer) -> Self {
        self.capturer = capturer;
        self
    }

    /// Attach artifacts of every comparison to `sink`
    #[must_use]
    pub fn with_report_sink(mut self, sink: impl ReportSink + Send + 'static) -> Self {
        self.reporter = Some(Mutex::new(Box::new(sink)));
        self
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &VisualConfig {
        &self.config
    }

    /// Underlying store
    #[must_use]
    pub const fn store(&self) -> &BaselineStore {
        &self.store
    }

    /// Capture the page and compare it with its baseline
    ///
    /// # Errors
    ///
    /// Returns an error on invalid options, capture failure, missing baseline
    /// when updates are disabled, dimension mismatch or filesystem failure
    pub async fn expect_page_to_match_snapshot(
        &self,
        page: &dyn CapturePage,
        test_name: &str,
        name: &str,
        options: &SnapshotOptions,
    ) -> VisregResult<ComparisonResult> {
        let resolved = self.config.resolve_options(options)?;
        let key = SnapshotKey::new(page.browser_name(), test_name, name)?;
        let request = CaptureRequest::page(test_name, name, resolved.capture.clone());
        let snapshot = self.capturer.capture(page, &request).await?;
        self.compare_snapshot(&key, &snapshot, &resolved)
    }

    /// Wait for `selector`, capture it and compare with its baseline
    ///
    /// # Errors
    ///
    /// As [`Self::expect_page_to_match_snapshot`], plus
    /// [`VisregError::CaptureTimeout`] if the element never becomes visible
    pub async fn expect_element_to_match_snapshot(
        &self,
        page: &dyn CapturePage,
        test_name: &str,
        selector: &str,
        name: &str,
        options: &SnapshotOptions,
    ) -> VisregResult<ComparisonResult> {
        let resolved = self.config.resolve_options(options)?;
        let key = SnapshotKey::new(page.browser_name(), test_name, name)?;
        let request = CaptureRequest::element(test_name, selector, name, resolved.capture.clone());
        let snapshot = self.capturer.capture(page, &request).await?;
        self.compare_snapshot(&key, &snapshot, &resolved)
    }

    /// Capture and compare the page at each viewport as `<name>-<viewport>`.
    ///
    /// The original viewport is restored afterwards, also on error.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any viewport
    pub async fn expect_responsive_snapshots(
        &self,
        page: &dyn CapturePage,
        test_name: &str,
        name: &str,
        viewports: &[Viewport],
        options: &SnapshotOptions,
    ) -> VisregResult<Vec<ComparisonResult>> {
        let original = page.viewport().await?;
        let outcome = self
            .compare_viewports(page, test_name, name, viewports, options)
            .await;
        let restored = page.set_viewport(original.0, original.1).await;
        match (outcome, restored) {
            (Ok(results), Ok(())) => Ok(results),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), restored) => {
                if let Err(restore_err) = restored {
                    warn!(error = %restore_err, "failed to restore viewport");
                }
                Err(e)
            }
        }
    }

    async fn compare_viewports(
        &self,
        page: &dyn CapturePage,
        test_name: &str,
        name: &str,
        viewports: &[Viewport],
        options: &SnapshotOptions,
    ) -> VisregResult<Vec<ComparisonResult>> {
        let mut results = Vec::with_capacity(viewports.len());
        for viewport in viewports {
            debug!(viewport = %viewport.name, width = viewport.width, height = viewport.height, "switching viewport");
            page.set_viewport(viewport.width, viewport.height).await?;
            let snapshot_name = format!("{name}-{}", viewport.name);
            results.push(
                self.expect_page_to_match_snapshot(page, test_name, &snapshot_name, options)
                    .await?,
            );
        }
        Ok(results)
    }

    /// Store `snapshot` as the actual capture for `key` and compare it
    ///
    /// # Errors
    ///
    /// Returns [`VisregError::BaselineMissing`] when no baseline exists and
    /// updates are disabled, [`VisregError::DimensionMismatch`] when sizes
    /// differ (unless every baseline is being updated) and I/O errors
    pub fn compare_snapshot(
        &self,
        key: &SnapshotKey,
        snapshot: &Snapshot,
        options: &ResolvedOptions,
    ) -> VisregResult<ComparisonResult> {
        let span = info_span!("visual_compare", snapshot = %key);
        let _guard = span.enter();

        let paths = Paths::new(&self.store, key);
        let actual_png = snapshot.to_png()?;
        self.store
            .write(&paths.actual, &actual_png, &key.fingerprint())?;
        self.compare_actual(key, &paths, &snapshot.image, &snapshot.masks, &actual_png, options)
    }

    /// Compare the already-stored actual capture for `key` with its baseline
    ///
    /// # Errors
    ///
    /// As [`Self::compare_snapshot`], plus [`VisregError::ImageDecode`] if
    /// the stored capture is unreadable
    pub fn compare_stored(
        &self,
        key: &SnapshotKey,
        options: &ResolvedOptions,
    ) -> VisregResult<ComparisonResult> {
        let span = info_span!("visual_compare", snapshot = %key);
        let _guard = span.enter();

        let paths = Paths::new(&self.store, key);
        let actual_png = std::fs::read(&paths.actual)?;
        let actual = decode_png(&actual_png)?;
        let masks: Vec<Region> = options
            .capture
            .masks
            .iter()
            .filter_map(|m| match m {
                MaskTarget::Region(r) => Some(*r),
                MaskTarget::Selector { .. } => None,
            })
            .collect();
        self.compare_actual(key, &paths, &actual, &masks, &actual_png, options)
    }

    fn compare_actual(
        &self,
        key: &SnapshotKey,
        paths: &Paths,
        actual: &RgbaImage,
        masks: &[Region],
        actual_png: &[u8],
        options: &ResolvedOptions,
    ) -> VisregResult<ComparisonResult> {
        let fingerprint = key.fingerprint();
        let pixels = compared_pixel_count(actual.width(), actual.height(), masks);

        if !self.store.exists(&paths.baseline) {
            if self.config.update_mode == UpdateMode::None {
                return Err(VisregError::BaselineMissing {
                    path: paths.baseline.clone(),
                });
            }
            if self.store.seed(&paths.baseline, actual_png, &fingerprint)? == SeedOutcome::Seeded {
                self.store.remove_file(&paths.diff)?;
                info!(path = %paths.baseline.display(), "created baseline");
                let result = ComparisonResult::seeded(key, paths, pixels, BaselineStatus::Created);
                self.report(&result, actual_png, actual_png, None)?;
                return Ok(result);
            }
            debug!("baseline seeded by another worker, comparing");
        }

        let baseline_png = self.store.read_bytes(&paths.baseline)?;
        let baseline = decode_png(&baseline_png)?;

        let evaluation = match evaluate(&baseline, actual, masks, options) {
            Err(VisregError::DimensionMismatch { expected, actual: got })
                if self.config.update_mode == UpdateMode::All =>
            {
                info!(?expected, actual = ?got, "dimensions changed, updating baseline");
                return self.update_baseline(key, paths, pixels, actual_png);
            }
            other => other?,
        };

        let summary = evaluation.diff.summary;
        if !evaluation.verdict.passed && self.config.update_mode == UpdateMode::All {
            info!(diff_pixels = summary.diff_pixels, "updating baseline");
            return self.update_baseline(key, paths, pixels, actual_png);
        }

        let diff_png = if summary.diff_pixels > 0 {
            let png = encode_png(&evaluation.diff.image)?;
            self.store.write(&paths.diff, &png, &fingerprint)?;
            Some(png)
        } else {
            self.store.remove_file(&paths.diff)?;
            None
        };

        let result = ComparisonResult {
            key: key.clone(),
            key_fingerprint: fingerprint,
            passed: evaluation.verdict.passed,
            diff_pixel_count: summary.diff_pixels,
            total_pixels: summary.total_pixels,
            diff_percentage: summary.diff_percentage(),
            max_color_delta: summary.max_delta,
            baseline_status: BaselineStatus::Compared,
            baseline_path: paths.baseline.clone(),
            actual_path: paths.actual.clone(),
            diff_path: diff_png.as_ref().map(|_| paths.diff.clone()),
        };

        if result.passed {
            info!(
                diff_pixels = result.diff_pixel_count,
                reason = ?evaluation.verdict.reason,
                "snapshot matches"
            );
        } else {
            warn!(
                diff_pixels = result.diff_pixel_count,
                diff_percentage = result.diff_percentage,
                "snapshot differs"
            );
        }

        self.report(&result, &baseline_png, actual_png, diff_png.as_deref())?;
        Ok(result)
    }

    fn update_baseline(
        &self,
        key: &SnapshotKey,
        paths: &Paths,
        pixels: u64,
        actual_png: &[u8],
    ) -> VisregResult<ComparisonResult> {
        self.store
            .write(&paths.baseline, actual_png, &key.fingerprint())?;
        self.store.remove_file(&paths.diff)?;
        let result = ComparisonResult::seeded(key, paths, pixels, BaselineStatus::Updated);
        self.report(&result, actual_png, actual_png, None)?;
        Ok(result)
    }

    fn report(
        &self,
        result: &ComparisonResult,
        baseline_png: &[u8],
        actual_png: &[u8],
        diff_png: Option<&[u8]>,
    ) -> VisregResult<()> {
        let Some(reporter) = &self.reporter else {
            return Ok(());
        };
        let mut sink = reporter.lock().unwrap_or_else(PoisonError::into_inner);
        match attach_comparison(&mut **sink, result, baseline_png, actual_png, diff_png) {
            Ok(()) => Ok(()),
            Err(e) => match self.config.reporting_failure {
                ReportingFailurePolicy::Log => {
                    warn!(attachment = e.attachment(), error = %e, "report attachment failed");
                    Ok(())
                }
                ReportingFailurePolicy::Escalate => Err(e.into()),
            },
        }
    }
}
