//! Snapshot runner: file comparison, verification and baseline maintenance

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use glob::Pattern;
use image::RgbaImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use visreg::snapshot::{decode_png, encode_png};
use visreg::{
    sanitize_segment, BaselineEntry, BaselineStatus, BaselineStore, ComparisonResult, DiffSummary,
    DirectoryReport, MaskTarget, PolicyComposition, Region, SnapshotKey, SnapshotOptions,
    UpdateMode, VerdictReason, VisualComparator, VisualConfig,
};

/// Two image files to compare
#[derive(Debug, Clone)]
pub struct CompareRequest {
    /// Expected image
    pub baseline: PathBuf,
    /// Actual image
    pub actual: PathBuf,
    /// Where to write the diff image, if anywhere
    pub diff: Option<PathBuf>,
    /// Tolerances and region masks
    pub options: SnapshotOptions,
    /// Configured defaults that `options` override; masks from both apply
    pub defaults: SnapshotOptions,
    /// How pixel and ratio limits combine
    pub composition: PolicyComposition,
}

impl CompareRequest {
    /// Compare `baseline` with `actual` under the tolerances and composition
    /// from `visual`
    #[must_use]
    pub fn new(baseline: PathBuf, actual: PathBuf, visual: &VisualConfig) -> Self {
        Self {
            baseline,
            actual,
            diff: None,
            options: SnapshotOptions::new(),
            defaults: visual.defaults.clone(),
            composition: visual.composition,
        }
    }
}

/// Outcome of comparing two image files
#[derive(Debug, Clone, Serialize)]
pub struct FileComparison {
    /// Expected image
    pub baseline: PathBuf,
    /// Actual image
    pub actual: PathBuf,
    /// Whether the images match within tolerance
    pub passed: bool,
    /// Why the verdict was reached
    pub reason: VerdictReason,
    /// Pixel counts
    pub summary: DiffSummary,
    /// Differing pixels as a percentage of compared pixels
    pub diff_percentage: f64,
    /// Diff image, written only when pixels differ
    pub diff_path: Option<PathBuf>,
}

/// Compare two PNG files without touching any baseline store
pub fn compare_files(request: &CompareRequest) -> CliResult<FileComparison> {
    let resolved = request
        .options
        .resolve(&request.defaults, request.composition)?;
    let baseline = read_image(&request.baseline)?;
    let actual = read_image(&request.actual)?;
    let masks: Vec<Region> = resolved
        .capture
        .masks
        .iter()
        .filter_map(|m| match m {
            MaskTarget::Region(r) => Some(*r),
            MaskTarget::Selector { .. } => None,
        })
        .collect();

    let evaluation = visreg::evaluate(&baseline, &actual, &masks, &resolved)?;
    let summary = evaluation.diff.summary;

    let diff_path = match request.diff {
        Some(ref path) if summary.diff_pixels > 0 => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, encode_png(&evaluation.diff.image)?)?;
            debug!(path = %path.display(), "wrote diff image");
            Some(path.clone())
        }
        _ => None,
    };

    Ok(FileComparison {
        baseline: request.baseline.clone(),
        actual: request.actual.clone(),
        passed: evaluation.verdict.passed,
        reason: evaluation.verdict.reason,
        summary,
        diff_percentage: summary.diff_percentage(),
        diff_path,
    })
}

fn read_image(path: &Path) -> CliResult<RgbaImage> {
    let bytes = std::fs::read(path)
        .map_err(|e| CliError::invalid_argument(format!("cannot read {}: {e}", path.display())))?;
    Ok(decode_png(&bytes)?)
}

/// Glob filters over snapshot keys
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    browser: Option<Pattern>,
    test: Option<Pattern>,
    name: Option<Pattern>,
}

impl KeyFilter {
    /// Build a filter; `None` matches everything
    pub fn new(browser: Option<&str>, test: Option<&str>, name: Option<&str>) -> CliResult<Self> {
        let compile = |p: Option<&str>| p.map(Pattern::new).transpose();
        Ok(Self {
            browser: compile(browser)?,
            test: compile(test)?,
            name: compile(name)?,
        })
    }

    /// Match everything
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether `key` passes every set pattern
    #[must_use]
    pub fn matches(&self, key: &SnapshotKey) -> bool {
        let check = |pattern: &Option<Pattern>, value: &str| {
            pattern.as_ref().map_or(true, |p| p.matches(value))
        };
        check(&self.browser, &key.browser)
            && check(&self.test, &key.test_name)
            && check(&self.name, &key.name)
    }
}

/// Result of verifying one stored capture
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotOutcome {
    /// `browser/test/name`
    pub snapshot: String,
    /// Comparison result, absent when the comparison errored
    pub result: Option<ComparisonResult>,
    /// Error message for comparisons that could not run
    pub error: Option<String>,
}

impl SnapshotOutcome {
    /// Whether the capture matched (or seeded) its baseline
    #[must_use]
    pub fn passed(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.passed)
    }
}

/// Aggregated verification results
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Per-snapshot outcomes, sorted by key
    pub outcomes: Vec<SnapshotOutcome>,
    /// Total wall time
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl VerifyReport {
    /// Snapshots within tolerance
    #[must_use]
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    /// Snapshots outside tolerance
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.as_ref().is_some_and(|r| !r.passed))
            .count()
    }

    /// Snapshots whose comparison errored
    #[must_use]
    pub fn errors(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }

    /// Whether every snapshot passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(SnapshotOutcome::passed)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.as_millis())
    }
}

/// Baselines, pending captures and diffs on disk
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// Committed baselines
    pub baselines: Vec<BaselineEntry>,
    /// Actual captures
    pub actual: Vec<BaselineEntry>,
    /// Actual captures with no baseline yet
    pub unbaselined: Vec<SnapshotKey>,
    /// Diff images from failed comparisons
    pub diffs: Vec<BaselineEntry>,
}

/// Runs store-level commands against a loaded configuration
#[derive(Debug)]
pub struct SnapshotRunner {
    config: CliConfig,
    visual: VisualConfig,
    store: BaselineStore,
}

impl SnapshotRunner {
    /// Create a runner
    #[must_use]
    pub fn new(config: CliConfig, visual: VisualConfig) -> Self {
        Self {
            store: BaselineStore::from_config(&visual),
            config,
            visual,
        }
    }

    /// Library configuration in use
    #[must_use]
    pub const fn visual_config(&self) -> &VisualConfig {
        &self.visual
    }

    /// Underlying store
    #[must_use]
    pub const fn store(&self) -> &BaselineStore {
        &self.store
    }

    /// Build a key filter. Without a browser pattern only the configured
    /// browser's snapshots match; pass `"*"` for every browser.
    pub fn key_filter(
        &self,
        browser: Option<&str>,
        test: Option<&str>,
        name: Option<&str>,
    ) -> CliResult<KeyFilter> {
        let configured = Pattern::escape(&sanitize_segment(&self.visual.browser)?);
        KeyFilter::new(Some(browser.unwrap_or(&configured)), test, name)
    }

    /// Compare every matching actual capture with its baseline.
    ///
    /// Missing baselines fail unless `seed_missing` is set. With `report`,
    /// artifacts go to the configured report directory.
    pub fn verify(
        &self,
        filter: &KeyFilter,
        seed_missing: bool,
        report: bool,
        reporter: &mut ProgressReporter,
    ) -> CliResult<VerifyReport> {
        let start = Instant::now();
        let mode = if seed_missing {
            UpdateMode::Missing
        } else {
            UpdateMode::None
        };
        let visual = self.visual.clone().with_update_mode(mode);
        let options = visual.resolve_options(&SnapshotOptions::new())?;
        let report_dir = visual.report_dir.clone();
        let mut comparator = VisualComparator::new(visual);
        if report {
            comparator = comparator.with_report_sink(DirectoryReport::new(report_dir));
        }

        let entries: Vec<BaselineEntry> = self
            .store
            .list_actual()?
            .into_iter()
            .filter(|e| filter.matches(&e.key))
            .collect();
        info!(count = entries.len(), "verifying stored captures");

        reporter.start_progress(entries.len() as u64, "verifying");
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let snapshot = entry.key.to_string();
            reporter.set_message(&snapshot);
            let outcome = match comparator.compare_stored(&entry.key, &options) {
                Ok(result) => {
                    if result.passed {
                        let note = match result.baseline_status {
                            BaselineStatus::Created => " (baseline created)",
                            BaselineStatus::Updated => " (baseline updated)",
                            BaselineStatus::Compared => "",
                        };
                        reporter.success(&format!("{snapshot}{note}"));
                    } else {
                        reporter.failure(&format!(
                            "{snapshot}: {} pixels differ ({:.2}%)",
                            result.diff_pixel_count, result.diff_percentage
                        ));
                    }
                    SnapshotOutcome {
                        snapshot,
                        result: Some(result),
                        error: None,
                    }
                }
                Err(e) if e.is_fatal() && !is_per_snapshot(&e) => return Err(e.into()),
                Err(e) => {
                    reporter.failure(&format!("{snapshot}: {e}"));
                    SnapshotOutcome {
                        snapshot,
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
            reporter.increment(1);
        }
        reporter.finish();

        let report = VerifyReport {
            outcomes,
            duration: start.elapsed(),
        };
        if self.config.verbosity.is_verbose() {
            debug!(
                passed = report.passed(),
                failed = report.failed(),
                errors = report.errors(),
                "verification finished"
            );
        }
        Ok(report)
    }

    /// Promote matching actual captures to baselines
    pub fn approve(&self, filter: &KeyFilter) -> CliResult<Vec<SnapshotKey>> {
        let mut approved = Vec::new();
        for entry in self.store.list_actual()? {
            if !filter.matches(&entry.key) {
                continue;
            }
            let path = self.store.promote(&entry.key)?;
            info!(snapshot = %entry.key, path = %path.display(), "approved");
            approved.push(entry.key);
        }
        Ok(approved)
    }

    /// What is on disk
    pub fn status(&self, filter: &KeyFilter) -> CliResult<StatusReport> {
        let keep = |entries: Vec<BaselineEntry>| -> Vec<BaselineEntry> {
            entries
                .into_iter()
                .filter(|e| filter.matches(&e.key))
                .collect()
        };
        let baselines = keep(self.store.list()?);
        let actual = keep(self.store.list_actual()?);
        let diffs = keep(self.store.list_diffs()?);
        let unbaselined = actual
            .iter()
            .filter(|e| !self.store.exists(&self.store.resolve(&e.key)))
            .map(|e| e.key.clone())
            .collect();
        Ok(StatusReport {
            baselines,
            actual,
            unbaselined,
            diffs,
        })
    }

    /// Delete actual and diff captures
    pub fn clean(&self) -> CliResult<usize> {
        let removed = self.store.clean_output()?;
        info!(removed, "cleaned output directory");
        Ok(removed)
    }
}

/// Errors that belong to one snapshot rather than the whole run
const fn is_per_snapshot(err: &visreg::VisregError) -> bool {
    matches!(
        err,
        visreg::VisregError::BaselineMissing { .. }
            | visreg::VisregError::DimensionMismatch { .. }
            | visreg::VisregError::ImageDecode { .. }
    )
}
