//! Snapshot capture from a live page.
//!
//! [`CapturePage`] is the seam between the comparator and whatever renders
//! the page. The [`Capturer`] waits for the target, stabilises rendering,
//! resolves masks and decodes the screenshot into a [`Snapshot`].

use crate::geometry::{BoundingBox, MaskTarget, Region};
use crate::options::{CaptureSettings, ScaleMode};
use crate::result::{VisregError, VisregResult};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default interval between visibility checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to a style sheet injected into a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StyleId(pub u64);

/// Screenshot parameters passed to a page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenshotParams {
    /// Page region in CSS pixels, `None` for the viewport or full page
    pub clip: Option<Region>,
    /// Capture the whole scrollable page
    pub full_page: bool,
    /// Pixel density of the returned image
    pub scale: ScaleMode,
}

/// A page that can be measured and screenshotted
#[async_trait]
pub trait CapturePage: Send + Sync {
    /// Browser identity used in baseline paths
    fn browser_name(&self) -> &str;

    /// Device pixels per CSS pixel
    fn device_scale_factor(&self) -> f64 {
        1.0
    }

    /// Current viewport (width, height) in CSS pixels
    async fn viewport(&self) -> VisregResult<(u32, u32)>;

    /// Resize the viewport
    async fn set_viewport(&self, width: u32, height: u32) -> VisregResult<()>;

    /// Box of the first element matching `selector`, `None` if nothing matches
    async fn bounding_box(&self, selector: &str) -> VisregResult<Option<BoundingBox>>;

    /// Add a style sheet to the page
    async fn inject_style(&self, css: &str) -> VisregResult<StyleId>;

    /// Remove a previously injected style sheet
    async fn remove_style(&self, id: StyleId) -> VisregResult<()>;

    /// PNG-encoded screenshot
    async fn screenshot(&self, params: &ScreenshotParams) -> VisregResult<Vec<u8>>;
}

/// What to capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    /// The viewport, full page or a clip of it
    Page,
    /// A single element
    Element {
        /// CSS selector
        selector: String,
    },
}

impl CaptureTarget {
    /// Label used in errors and logs
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Page => "page",
            Self::Element { selector } => selector,
        }
    }
}

/// A single capture request
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// Test name
    pub test_name: String,
    /// Snapshot name
    pub name: String,
    /// Page or element
    pub target: CaptureTarget,
    /// Resolved capture settings
    pub settings: CaptureSettings,
}

impl CaptureRequest {
    /// Whole-page request
    #[must_use]
    pub fn page(
        test_name: impl Into<String>,
        name: impl Into<String>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            name: name.into(),
            target: CaptureTarget::Page,
            settings,
        }
    }

    /// Element request
    #[must_use]
    pub fn element(
        test_name: impl Into<String>,
        selector: impl Into<String>,
        name: impl Into<String>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            name: name.into(),
            target: CaptureTarget::Element {
                selector: selector.into(),
            },
            settings,
        }
    }
}

/// Takes snapshots from a [`CapturePage`]
#[derive(Debug, Clone, Copy)]
pub struct Capturer {
    poll_interval: Duration,
}

impl Default for Capturer {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Capturer {
    /// Capturer with the default poll interval
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the visibility poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Capture a snapshot
    ///
    /// # Errors
    ///
    /// - [`VisregError::CaptureTimeout`] if the element never becomes visible
    ///   or the screenshot does not finish before the timeout
    /// - [`VisregError::Page`] or [`VisregError::ImageDecode`] on page failures
    pub async fn capture(
        &self,
        page: &dyn CapturePage,
        request: &CaptureRequest,
    ) -> VisregResult<Snapshot> {
        let settings = &request.settings;
        let deadline = Instant::now() + settings.timeout;
        let timed_out = || VisregError::CaptureTimeout {
            target: request.target.label().to_string(),
            ms: u64::try_from(settings.timeout.as_millis()).unwrap_or(u64::MAX),
        };

        let element = match &request.target {
            CaptureTarget::Page => None,
            CaptureTarget::Element { selector } => {
                let bbox = self
                    .wait_for_visible(page, selector, deadline)
                    .await?
                    .ok_or_else(timed_out)?;
                Some(bbox.to_region())
            }
        };

        let css = settings.stabilizing_css();
        let style = if css.is_empty() {
            None
        } else {
            Some(page.inject_style(&css).await?)
        };

        let shot = tokio::time::timeout_at(deadline, shoot(page, request, element)).await;

        if let Some(id) = style {
            if let Err(e) = page.remove_style(id).await {
                warn!(error = %e, "failed to remove capture style");
            }
        }

        let (png, masks) = shot.map_err(|_| timed_out())??;
        let snapshot = Snapshot::from_png(
            &request.name,
            &request.test_name,
            page.browser_name(),
            &png,
        )?
        .with_masks(masks);
        debug!(
            name = %request.name,
            width = snapshot.width(),
            height = snapshot.height(),
            masks = snapshot.masks.len(),
            "captured snapshot"
        );
        Ok(snapshot)
    }

    /// Poll until `selector` has a visible box; `None` once `deadline` passes
    async fn wait_for_visible(
        &self,
        page: &dyn CapturePage,
        selector: &str,
        deadline: Instant,
    ) -> VisregResult<Option<BoundingBox>> {
        loop {
            if let Some(bbox) = page.bounding_box(selector).await? {
                if bbox.is_visible() {
                    return Ok(Some(bbox));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(selector, "element not visible before timeout");
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

async fn shoot(
    page: &dyn CapturePage,
    request: &CaptureRequest,
    element: Option<Region>,
) -> VisregResult<(Vec<u8>, Vec<Region>)> {
    let settings = &request.settings;
    let clip = element.or(settings.clip);
    let origin = clip.map_or((0, 0), |c| (c.x, c.y));
    let scale = match settings.scale {
        ScaleMode::Css => 1.0,
        ScaleMode::Device => page.device_scale_factor(),
    };

    let mut masks = Vec::with_capacity(settings.masks.len());
    for target in &settings.masks {
        let region = match target {
            MaskTarget::Region(region) => Some(*region),
            MaskTarget::Selector { selector } => match page.bounding_box(selector).await? {
                Some(bbox) if bbox.is_visible() => Some(bbox.to_region()),
                _ => {
                    debug!(selector = %selector, "mask selector matched nothing, ignoring");
                    None
                }
            },
        };
        if let Some(mapped) = region.and_then(|r| r.to_capture_space(origin, scale)) {
            masks.push(mapped);
        }
    }

    let params = ScreenshotParams {
        clip,
        full_page: settings.full_page && element.is_none(),
        scale: settings.scale,
    };
    let png = page.screenshot(&params).await?;
    Ok((png, masks))
}
