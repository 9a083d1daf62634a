//! Page implementations.
//!
//! With the `browser` feature, [`CdpPage`] drives headless Chromium over the
//! Chrome `DevTools` Protocol via chromiumoxide. [`MockPage`] renders from an
//! in-memory raster and is always available.

use crate::capture::{CapturePage, ScreenshotParams, StyleId};
use crate::geometry::{BoundingBox, Region};
use crate::options::ScaleMode;
use crate::result::{VisregError, VisregResult};
use crate::snapshot::encode_png;
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Browser launch configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Device pixels per CSS pixel
    pub device_scale_factor: f64,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            device_scale_factor: 1.0,
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set device scale factor
    #[must_use]
    pub const fn with_device_scale_factor(mut self, factor: f64) -> Self {
        self.device_scale_factor = factor;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

// ============================================================================
// Real CDP Implementation (when `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
mod cdp {
    use super::*;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
    use chromiumoxide::cdp::browser_protocol::page::{
        CaptureScreenshotFormat, CaptureScreenshotParams, GetLayoutMetricsParams, Viewport,
    };
    use chromiumoxide::page::Page;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Browser instance with a CDP connection
    #[derive(Debug)]
    pub struct Browser {
        config: BrowserConfig,
        inner: tokio::sync::Mutex<CdpBrowser>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl Browser {
        /// Launch a browser
        ///
        /// # Errors
        ///
        /// Returns [`VisregError::BrowserLaunch`] if chromium cannot be started
        pub async fn launch(config: BrowserConfig) -> VisregResult<Self> {
            let mut builder = CdpConfig::builder().window_size(
                config.viewport_width,
                config.viewport_height,
            );
            if !config.headless {
                builder = builder.with_head();
            }
            if !config.sandbox {
                builder = builder.no_sandbox();
            }
            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }

            let cdp_config = builder
                .build()
                .map_err(|message| VisregError::BrowserLaunch { message })?;

            let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(|e| {
                VisregError::BrowserLaunch {
                    message: e.to_string(),
                }
            })?;

            let handle = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            Ok(Self {
                config,
                inner: tokio::sync::Mutex::new(browser),
                handle,
            })
        }

        /// Open `url` in a new page sized to the configured viewport
        ///
        /// # Errors
        ///
        /// Returns [`VisregError::Page`] if the page cannot be created
        pub async fn new_page(&self, url: &str, browser_name: &str) -> VisregResult<CdpPage> {
            let page = {
                let browser = self.inner.lock().await;
                browser.new_page(url).await.map_err(|e| VisregError::page(e.to_string()))?
            };
            let page = CdpPage {
                page,
                browser_name: browser_name.to_string(),
                device_scale_factor: self.config.device_scale_factor,
                viewport: Mutex::new((self.config.viewport_width, self.config.viewport_height)),
                next_style: AtomicU64::new(1),
            };
            page.set_viewport(self.config.viewport_width, self.config.viewport_height)
                .await?;
            Ok(page)
        }

        /// Close the browser
        ///
        /// # Errors
        ///
        /// Returns [`VisregError::BrowserLaunch`] if shutdown fails
        pub async fn close(self) -> VisregResult<()> {
            let mut browser = self.inner.lock().await;
            browser
                .close()
                .await
                .map_err(|e| VisregError::BrowserLaunch {
                    message: e.to_string(),
                })?;
            self.handle.abort();
            Ok(())
        }
    }

    /// A Chromium page driven over CDP
    #[derive(Debug)]
    pub struct CdpPage {
        page: Page,
        browser_name: String,
        device_scale_factor: f64,
        viewport: Mutex<(u32, u32)>,
        next_style: AtomicU64,
    }

    impl CdpPage {
        /// Navigate to `url` and wait for the load event
        ///
        /// # Errors
        ///
        /// Returns [`VisregError::Page`] if navigation fails
        pub async fn goto(&self, url: &str) -> VisregResult<()> {
            self.page.goto(url).await.map_err(|e| VisregError::page(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| VisregError::page(e.to_string()))?;
            Ok(())
        }

        async fn content_size(&self) -> VisregResult<(u32, u32)> {
            let metrics = self
                .page
                .execute(GetLayoutMetricsParams::default())
                .await
                .map_err(|e| VisregError::page(e.to_string()))?;
            let size = &metrics.css_content_size;
            Ok((size.width.ceil() as u32, size.height.ceil() as u32))
        }
    }

    #[async_trait]
    impl CapturePage for CdpPage {
        fn browser_name(&self) -> &str {
            &self.browser_name
        }

        fn device_scale_factor(&self) -> f64 {
            self.device_scale_factor
        }

        async fn viewport(&self) -> VisregResult<(u32, u32)> {
            Ok(*lock(&self.viewport))
        }

        async fn set_viewport(&self, width: u32, height: u32) -> VisregResult<()> {
            let params = SetDeviceMetricsOverrideParams::new(
                i64::from(width),
                i64::from(height),
                self.device_scale_factor,
                false,
            );
            self.page.execute(params).await.map_err(|e| VisregError::page(e.to_string()))?;
            *lock(&self.viewport) = (width, height);
            Ok(())
        }

        async fn bounding_box(&self, selector: &str) -> VisregResult<Option<BoundingBox>> {
            let selector = serde_json::to_string(selector)?;
            let script = format!(
                "(() => {{ const el = document.querySelector({selector}); \
                 if (!el) return null; const r = el.getBoundingClientRect(); \
                 return {{ x: r.x + window.scrollX, y: r.y + window.scrollY, \
                 width: r.width, height: r.height }}; }})()"
            );
            let result = self
                .page
                .evaluate(script)
                .await
                .map_err(|e| VisregError::page(e.to_string()))?;
            result
                .into_value::<Option<BoundingBox>>()
                .map_err(|e| VisregError::page(e.to_string()))
        }

        async fn inject_style(&self, css: &str) -> VisregResult<StyleId> {
            let id = StyleId(self.next_style.fetch_add(1, Ordering::Relaxed));
            let css = serde_json::to_string(css)?;
            let script = format!(
                "(() => {{ const s = document.createElement('style'); \
                 s.id = '__visreg_style_{}'; s.textContent = {css}; \
                 document.head.appendChild(s); return true; }})()",
                id.0
            );
            self.page
                .evaluate(script)
                .await
                .map_err(|e| VisregError::page(e.to_string()))?;
            Ok(id)
        }

        async fn remove_style(&self, id: StyleId) -> VisregResult<()> {
            let script = format!(
                "(() => {{ const s = document.getElementById('__visreg_style_{}'); \
                 if (s) s.remove(); return true; }})()",
                id.0
            );
            self.page
                .evaluate(script)
                .await
                .map_err(|e| VisregError::page(e.to_string()))?;
            Ok(())
        }

        async fn screenshot(&self, params: &ScreenshotParams) -> VisregResult<Vec<u8>> {
            let clip = match (params.clip, params.full_page) {
                (Some(clip), _) => clip,
                (None, true) => {
                    let (width, height) = self.content_size().await?;
                    Region::new(0, 0, width, height)
                }
                (None, false) => {
                    let (width, height) = *lock(&self.viewport);
                    Region::new(0, 0, width, height)
                }
            };
            // CDP renders at device pixels; a clip scale of 1/dpr yields CSS pixels.
            let scale = match params.scale {
                ScaleMode::Css => 1.0 / self.device_scale_factor,
                ScaleMode::Device => 1.0,
            };
            let viewport = Viewport::new(
                f64::from(clip.x),
                f64::from(clip.y),
                f64::from(clip.width),
                f64::from(clip.height),
                scale,
            );
            let request = CaptureScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .clip(viewport)
                .capture_beyond_viewport(params.full_page || params.clip.is_some())
                .build();

            let screenshot = self
                .page
                .execute(request)
                .await
                .map_err(|e| VisregError::page(e.to_string()))?;

            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&screenshot.data)
                .map_err(|e| VisregError::ImageDecode {
                    message: e.to_string(),
                })
        }
    }
}

#[cfg(feature = "browser")]
pub use cdp::{Browser, CdpPage};

// ============================================================================
// In-memory page
// ============================================================================

type Renderer = Box<dyn Fn(u32, u32) -> RgbaImage + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct MockElement {
    bbox: BoundingBox,
    visible_after: u32,
}

#[derive(Debug, Default)]
struct MockState {
    viewport: (u32, u32),
    polls: u32,
    styles: Vec<(StyleId, String)>,
    style_history: Vec<String>,
    next_style: u64,
}

/// In-memory page rendering from a raster "document"
///
/// Elements are registered with fixed boxes, optionally becoming visible
/// only after a number of lookups. An optional renderer regenerates the
/// document whenever the viewport changes.
pub struct MockPage {
    browser_name: String,
    document: Mutex<RgbaImage>,
    renderer: Option<Renderer>,
    elements: HashMap<String, MockElement>,
    device_scale_factor: f64,
    fail_screenshots: bool,
    state: Mutex<MockState>,
}

impl std::fmt::Debug for MockPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPage")
            .field("browser_name", &self.browser_name)
            .field("elements", &self.elements.len())
            .field("device_scale_factor", &self.device_scale_factor)
            .finish_non_exhaustive()
    }
}

impl MockPage {
    /// Page whose viewport matches the document size
    #[must_use]
    pub fn new(document: RgbaImage) -> Self {
        let viewport = document.dimensions();
        Self {
            browser_name: String::from("mock"),
            document: Mutex::new(document),
            renderer: None,
            elements: HashMap::new(),
            device_scale_factor: 1.0,
            fail_screenshots: false,
            state: Mutex::new(MockState {
                viewport,
                ..MockState::default()
            }),
        }
    }

    /// Page whose document is produced by `render(width, height)` for each viewport
    #[must_use]
    pub fn with_renderer<F>(width: u32, height: u32, render: F) -> Self
    where
        F: Fn(u32, u32) -> RgbaImage + Send + Sync + 'static,
    {
        let mut page = Self::new(render(width, height));
        page.renderer = Some(Box::new(render));
        page
    }

    /// Set the browser name
    #[must_use]
    pub fn with_browser_name(mut self, name: impl Into<String>) -> Self {
        self.browser_name = name.into();
        self
    }

    /// Set the viewport without re-rendering
    #[must_use]
    pub fn with_viewport(self, width: u32, height: u32) -> Self {
        lock(&self.state).viewport = (width, height);
        self
    }

    /// Set device pixels per CSS pixel
    #[must_use]
    pub const fn with_device_scale_factor(mut self, factor: f64) -> Self {
        self.device_scale_factor = factor;
        self
    }

    /// Register a visible element
    #[must_use]
    pub fn with_element(self, selector: impl Into<String>, bbox: BoundingBox) -> Self {
        self.with_element_after(selector, bbox, 0)
    }

    /// Register an element that is reported only after `polls` lookups
    #[must_use]
    pub fn with_element_after(
        mut self,
        selector: impl Into<String>,
        bbox: BoundingBox,
        polls: u32,
    ) -> Self {
        self.elements.insert(
            selector.into(),
            MockElement {
                bbox,
                visible_after: polls,
            },
        );
        self
    }

    /// Make every screenshot fail with a page error
    #[must_use]
    pub const fn with_failing_screenshots(mut self) -> Self {
        self.fail_screenshots = true;
        self
    }

    /// Number of `bounding_box` calls so far
    #[must_use]
    pub fn bounding_box_calls(&self) -> u32 {
        lock(&self.state).polls
    }

    /// Style sheets currently injected
    #[must_use]
    pub fn injected_styles(&self) -> Vec<String> {
        lock(&self.state)
            .styles
            .iter()
            .map(|(_, css)| css.clone())
            .collect()
    }

    /// Every style sheet ever injected
    #[must_use]
    pub fn style_history(&self) -> Vec<String> {
        lock(&self.state).style_history.clone()
    }

    /// Replace the document
    pub fn set_document(&self, document: RgbaImage) {
        *lock(&self.document) = document;
    }
}

#[async_trait]
impl CapturePage for MockPage {
    fn browser_name(&self) -> &str {
        &self.browser_name
    }

    fn device_scale_factor(&self) -> f64 {
        self.device_scale_factor
    }

    async fn viewport(&self) -> VisregResult<(u32, u32)> {
        Ok(lock(&self.state).viewport)
    }

    async fn set_viewport(&self, width: u32, height: u32) -> VisregResult<()> {
        if width == 0 || height == 0 {
            return Err(VisregError::page(format!(
                "invalid viewport {width}x{height}"
            )));
        }
        lock(&self.state).viewport = (width, height);
        if let Some(render) = &self.renderer {
            *lock(&self.document) = render(width, height);
        }
        Ok(())
    }

    async fn bounding_box(&self, selector: &str) -> VisregResult<Option<BoundingBox>> {
        let mut state = lock(&self.state);
        state.polls += 1;
        let polls = state.polls;
        Ok(self
            .elements
            .get(selector)
            .filter(|el| polls > el.visible_after)
            .map(|el| el.bbox))
    }

    async fn inject_style(&self, css: &str) -> VisregResult<StyleId> {
        let mut state = lock(&self.state);
        state.next_style += 1;
        let id = StyleId(state.next_style);
        state.styles.push((id, css.to_string()));
        state.style_history.push(css.to_string());
        Ok(id)
    }

    async fn remove_style(&self, id: StyleId) -> VisregResult<()> {
        lock(&self.state).styles.retain(|(style, _)| *style != id);
        Ok(())
    }

    async fn screenshot(&self, params: &ScreenshotParams) -> VisregResult<Vec<u8>> {
        if self.fail_screenshots {
            return Err(VisregError::page("screenshot failed"));
        }
        let viewport = lock(&self.state).viewport;
        let document = lock(&self.document);
        let (doc_w, doc_h) = document.dimensions();
        let area = match (params.clip, params.full_page) {
            (Some(clip), _) => clip,
            (None, true) => Region::new(0, 0, doc_w, doc_h),
            (None, false) => Region::new(0, 0, viewport.0, viewport.1),
        };
        let area = area
            .clamp_to(doc_w, doc_h)
            .ok_or_else(|| VisregError::page("capture area lies outside the page"))?;
        let mut image =
            imageops::crop_imm(&*document, area.x, area.y, area.width, area.height).to_image();
        drop(document);

        if params.scale == ScaleMode::Device && (self.device_scale_factor - 1.0).abs() > f64::EPSILON
        {
            let width = (f64::from(image.width()) * self.device_scale_factor).round() as u32;
            let height = (f64::from(image.height()) * self.device_scale_factor).round() as u32;
            image = imageops::resize(&image, width, height, FilterType::Nearest);
        }
        encode_png(&image)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::snapshot::decode_png;
    use image::Rgba;

    #[test]
    fn test_browser_config_builders() {
        let config = BrowserConfig::default()
            .with_viewport(375, 667)
            .with_device_scale_factor(2.0)
            .with_headless(false)
            .with_chromium_path("/usr/bin/chromium")
            .with_no_sandbox();
        assert_eq!((config.viewport_width, config.viewport_height), (375, 667));
        assert_eq!(config.device_scale_factor, 2.0);
        assert!(!config.headless);
        assert!(!config.sandbox);
        assert_eq!(config.chromium_path.as_deref(), Some("/usr/bin/chromium"));
    }

    #[tokio::test]
    async fn test_renderer_follows_viewport() {
        let page = MockPage::with_renderer(100, 50, |w, h| {
            RgbaImage::from_pixel(w, h * 2, Rgba([w as u8, 0, 0, 255]))
        });
        page.set_viewport(60, 40).await.unwrap();
        assert_eq!(page.viewport().await.unwrap(), (60, 40));

        let params = ScreenshotParams {
            clip: None,
            full_page: true,
            scale: ScaleMode::Css,
        };
        let image = decode_png(&page.screenshot(&params).await.unwrap()).unwrap();
        assert_eq!(image.dimensions(), (60, 80));
        assert_eq!(image.get_pixel(0, 0), &Rgba([60, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_zero_viewport_rejected() {
        let page = MockPage::new(RgbaImage::new(10, 10));
        assert!(page.set_viewport(0, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_clip_outside_page_is_error() {
        let page = MockPage::new(RgbaImage::new(10, 10));
        let params = ScreenshotParams {
            clip: Some(Region::new(20, 20, 5, 5)),
            full_page: false,
            scale: ScaleMode::Css,
        };
        assert!(matches!(
            page.screenshot(&params).await,
            Err(VisregError::Page { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_selector_is_none() {
        let page = MockPage::new(RgbaImage::new(10, 10)).with_browser_name("webkit");
        assert_eq!(page.browser_name(), "webkit");
        assert!(page.bounding_box("#missing").await.unwrap().is_none());
        assert_eq!(page.bounding_box_calls(), 1);
    }
}
