//! Comparator configuration.
//!
//! Built-in defaults are overlaid by an optional YAML file and then by
//! `VISREG_*` environment variables.

use crate::options::{ResolvedOptions, SnapshotOptions};
use crate::result::{VisregError, VisregResult};
use crate::verdict::PolicyComposition;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "visreg.yaml";

/// Environment variable overriding the baseline directory
pub const ENV_BASELINE_DIR: &str = "VISREG_BASELINE_DIR";
/// Environment variable overriding the output directory
pub const ENV_OUTPUT_DIR: &str = "VISREG_OUTPUT_DIR";
/// Environment variable overriding the browser name
pub const ENV_BROWSER: &str = "VISREG_BROWSER";
/// Environment variable overriding the update mode
pub const ENV_UPDATE_BASELINES: &str = "VISREG_UPDATE_BASELINES";

/// When baselines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Never write baselines; a missing baseline is an error
    None,
    /// Seed baselines that do not exist yet
    #[default]
    Missing,
    /// Overwrite baselines whenever a comparison fails
    All,
}

impl FromStr for UpdateMode {
    type Err = VisregError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" | "false" => Ok(Self::None),
            "missing" => Ok(Self::Missing),
            "all" | "1" | "true" => Ok(Self::All),
            other => Err(VisregError::config(format!(
                "unknown update mode {other:?} (expected none, missing or all)"
            ))),
        }
    }
}

/// What to do when a report attachment cannot be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportingFailurePolicy {
    /// Log a warning and keep the comparison result
    #[default]
    Log,
    /// Fail the comparison call with the reporting error
    Escalate,
}

/// Configuration for the visual comparator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct VisualConfig {
    /// Root of committed baselines
    pub baseline_dir: PathBuf,
    /// Root of actual and diff captures
    pub output_dir: PathBuf,
    /// Root of report attachments
    pub report_dir: PathBuf,
    /// Browser identity used in paths
    pub browser: String,
    /// Baseline write policy
    pub update_mode: UpdateMode,
    /// How tolerance limits combine
    pub composition: PolicyComposition,
    /// Report failure handling
    pub reporting_failure: ReportingFailurePolicy,
    /// Default snapshot options
    pub defaults: SnapshotOptions,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("tests/visual/baseline"),
            output_dir: PathBuf::from("test-results/visual"),
            report_dir: PathBuf::from("test-results/visual/report"),
            browser: String::from("chromium"),
            update_mode: UpdateMode::default(),
            composition: PolicyComposition::default(),
            reporting_failure: ReportingFailurePolicy::default(),
            defaults: SnapshotOptions::default(),
        }
    }
}

impl VisualConfig {
    /// Create a new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the baseline directory
    #[must_use]
    pub fn with_baseline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline_dir = dir.into();
        self
    }

    /// Set the output directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the report directory
    #[must_use]
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    /// Set the browser name
    #[must_use]
    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = browser.into();
        self
    }

    /// Set the update mode
    #[must_use]
    pub const fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    /// Set the limit composition
    #[must_use]
    pub const fn with_composition(mut self, composition: PolicyComposition) -> Self {
        self.composition = composition;
        self
    }

    /// Set the reporting failure policy
    #[must_use]
    pub const fn with_reporting_failure(mut self, policy: ReportingFailurePolicy) -> Self {
        self.reporting_failure = policy;
        self
    }

    /// Set default snapshot options
    #[must_use]
    pub fn with_defaults(mut self, defaults: SnapshotOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> VisregResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Read a YAML file
    pub fn from_file(path: &Path) -> VisregResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            VisregError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// Defaults, then `path` (or `./visreg.yaml` if present), then the environment
    pub fn load(path: Option<&Path>) -> VisregResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `VISREG_*` overrides using `lookup` to read variables
    pub fn with_env_overrides<F>(mut self, lookup: F) -> VisregResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_BASELINE_DIR).filter(|v| !v.is_empty()) {
            self.baseline_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR).filter(|v| !v.is_empty()) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(browser) = lookup(ENV_BROWSER).filter(|v| !v.is_empty()) {
            self.browser = browser;
        }
        if let Some(mode) = lookup(ENV_UPDATE_BASELINES).filter(|v| !v.is_empty()) {
            self.update_mode = mode.parse()?;
        }
        Ok(self)
    }

    /// Merge per-call options with configured defaults
    pub fn resolve_options(&self, options: &SnapshotOptions) -> VisregResult<ResolvedOptions> {
        options.resolve(&self.defaults, self.composition)
    }
}
