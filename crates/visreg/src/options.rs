//! Snapshot options and their resolution against configured defaults.
//!
//! Callers pass partial [`SnapshotOptions`]; [`SnapshotOptions::resolve`] is the
//! one place where they are merged with defaults and validated.

use crate::geometry::{MaskTarget, Region};
use crate::result::{VisregError, VisregResult};
use crate::verdict::{PolicyComposition, VerdictPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default colour / ratio threshold
pub const DEFAULT_THRESHOLD: f64 = 0.2;

/// Default capture timeout (30 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// CSS animation handling during capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Animations {
    /// Pause animations and transitions
    #[default]
    Disabled,
    /// Leave animations running
    Allow,
}

/// Text caret handling during capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Caret {
    /// Make the caret transparent
    #[default]
    Hide,
    /// Leave the caret as rendered
    Initial,
}

/// Pixel density of the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// One image pixel per CSS pixel
    #[default]
    Css,
    /// One image pixel per device pixel
    Device,
}

/// Per-call options; unset fields fall back to configured defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SnapshotOptions {
    /// Colour sensitivity and, unless `max_diff_pixel_ratio` is set, the ratio limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Per-pixel colour sensitivity override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_threshold: Option<f64>,
    /// Absolute limit on differing pixels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_diff_pixels: Option<u64>,
    /// Ratio limit override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_diff_pixel_ratio: Option<f64>,
    /// Capture the whole scrollable page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
    /// Capture only this page region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<Region>,
    /// Regions or elements excluded from comparison
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mask: Vec<MaskTarget>,
    /// Animation handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animations: Option<Animations>,
    /// Caret handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caret: Option<Caret>,
    /// Pixel density
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleMode>,
    /// Capture timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl SnapshotOptions {
    /// Empty options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Set per-pixel colour threshold
    #[must_use]
    pub const fn with_color_threshold(mut self, threshold: f64) -> Self {
        self.color_threshold = Some(threshold);
        self
    }

    /// Set maximum number of differing pixels
    #[must_use]
    pub const fn with_max_diff_pixels(mut self, pixels: u64) -> Self {
        self.max_diff_pixels = Some(pixels);
        self
    }

    /// Set maximum ratio of differing pixels
    #[must_use]
    pub const fn with_max_diff_pixel_ratio(mut self, ratio: f64) -> Self {
        self.max_diff_pixel_ratio = Some(ratio);
        self
    }

    /// Capture the full scrollable page
    #[must_use]
    pub const fn with_full_page(mut self, full_page: bool) -> Self {
        self.full_page = Some(full_page);
        self
    }

    /// Capture a page region
    #[must_use]
    pub const fn with_clip(mut self, clip: Region) -> Self {
        self.clip = Some(clip);
        self
    }

    /// Add a mask
    #[must_use]
    pub fn with_mask(mut self, mask: impl Into<MaskTarget>) -> Self {
        self.mask.push(mask.into());
        self
    }

    /// Set animation handling
    #[must_use]
    pub const fn with_animations(mut self, animations: Animations) -> Self {
        self.animations = Some(animations);
        self
    }

    /// Set caret handling
    #[must_use]
    pub const fn with_caret(mut self, caret: Caret) -> Self {
        self.caret = Some(caret);
        self
    }

    /// Set pixel density
    #[must_use]
    pub const fn with_scale(mut self, scale: ScaleMode) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set capture timeout
    #[must_use]
    pub const fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    /// Fields set on `self` win; masks from both are kept
    #[must_use]
    pub fn merged_over(&self, defaults: &Self) -> Self {
        let mut mask = defaults.mask.clone();
        mask.extend(self.mask.iter().cloned());
        Self {
            threshold: self.threshold.or(defaults.threshold),
            color_threshold: self.color_threshold.or(defaults.color_threshold),
            max_diff_pixels: self.max_diff_pixels.or(defaults.max_diff_pixels),
            max_diff_pixel_ratio: self.max_diff_pixel_ratio.or(defaults.max_diff_pixel_ratio),
            full_page: self.full_page.or(defaults.full_page),
            clip: self.clip.or(defaults.clip),
            mask,
            animations: self.animations.or(defaults.animations),
            caret: self.caret.or(defaults.caret),
            scale: self.scale.or(defaults.scale),
            timeout: self.timeout.or(defaults.timeout),
        }
    }

    /// Merge with `defaults`, fill built-in defaults and validate
    pub fn resolve(
        &self,
        defaults: &Self,
        composition: PolicyComposition,
    ) -> VisregResult<ResolvedOptions> {
        let merged = self.merged_over(defaults);

        let threshold = unit_interval("threshold", merged.threshold.unwrap_or(DEFAULT_THRESHOLD))?;
        let color_threshold =
            unit_interval("colorThreshold", merged.color_threshold.unwrap_or(threshold))?;
        let ratio = unit_interval(
            "maxDiffPixelRatio",
            merged.max_diff_pixel_ratio.unwrap_or(threshold),
        )?;

        if let Some(clip) = merged.clip {
            if clip.is_empty() {
                return Err(VisregError::invalid_options(
                    "clip must have a positive width and height",
                ));
            }
        }
        let timeout_ms = merged.timeout.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(VisregError::invalid_options("timeout must be positive"));
        }

        let mut policy = VerdictPolicy::exact()
            .with_max_diff_ratio(ratio)
            .with_composition(composition);
        policy.max_diff_pixels = merged.max_diff_pixels;

        Ok(ResolvedOptions {
            color_threshold,
            policy,
            capture: CaptureSettings {
                full_page: merged.full_page.unwrap_or(false),
                clip: merged.clip,
                masks: merged.mask,
                animations: merged.animations.unwrap_or_default(),
                caret: merged.caret.unwrap_or_default(),
                scale: merged.scale.unwrap_or_default(),
                timeout: Duration::from_millis(timeout_ms),
            },
        })
    }
}

fn unit_interval(field: &str, value: f64) -> VisregResult<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(VisregError::invalid_options(format!(
            "{field} must be within [0, 1], got {value}"
        )))
    }
}

/// Capture parameters after defaults are applied
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Capture the whole scrollable page
    pub full_page: bool,
    /// Page region to capture
    pub clip: Option<Region>,
    /// Masks in page coordinates or selectors
    pub masks: Vec<MaskTarget>,
    /// Animation handling
    pub animations: Animations,
    /// Caret handling
    pub caret: Caret,
    /// Pixel density
    pub scale: ScaleMode,
    /// Capture timeout
    pub timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            full_page: false,
            clip: None,
            masks: Vec::new(),
            animations: Animations::Disabled,
            caret: Caret::Hide,
            scale: ScaleMode::Css,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl CaptureSettings {
    /// Style sheet that stabilises rendering, empty when nothing needs injecting
    #[must_use]
    pub fn stabilizing_css(&self) -> String {
        let mut css = String::new();
        if self.animations == Animations::Disabled {
            css.push_str(
                "*, *::before, *::after { animation-play-state: paused !important; \
                 animation-delay: -0.0001s !important; animation-duration: 0s !important; \
                 transition: none !important; }\n",
            );
        }
        if self.caret == Caret::Hide {
            css.push_str("*, *::before, *::after { caret-color: transparent !important; }\n");
        }
        css
    }
}

/// Fully-specified comparison options
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    /// Per-pixel colour sensitivity
    pub color_threshold: f64,
    /// Tolerance policy
    pub policy: VerdictPolicy,
    /// Capture parameters
    pub capture: CaptureSettings,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        Self {
            color_threshold: DEFAULT_THRESHOLD,
            policy: VerdictPolicy::exact().with_max_diff_ratio(DEFAULT_THRESHOLD),
            capture: CaptureSettings::default(),
        }
    }
}
