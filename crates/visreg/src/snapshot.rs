//! Captured rasters.

use crate::geometry::Region;
use crate::result::{VisregError, VisregResult};
use image::{ImageEncoder, RgbaImage};

/// A single capture: an RGBA raster tagged with its test identity.
///
/// Masks are stored in the snapshot's own pixel space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Snapshot name/identifier
    pub name: String,
    /// Test that produced the capture
    pub test_name: String,
    /// Browser or platform identity
    pub browser: String,
    /// Pixels
    pub image: RgbaImage,
    /// Regions excluded from comparison
    pub masks: Vec<Region>,
}

impl Snapshot {
    /// Wrap a raster
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        test_name: impl Into<String>,
        browser: impl Into<String>,
        image: RgbaImage,
    ) -> Self {
        Self {
            name: name.into(),
            test_name: test_name.into(),
            browser: browser.into(),
            image,
            masks: Vec::new(),
        }
    }

    /// Decode PNG (or any format the `image` crate recognises) into a snapshot
    pub fn from_png(
        name: impl Into<String>,
        test_name: impl Into<String>,
        browser: impl Into<String>,
        bytes: &[u8],
    ) -> VisregResult<Self> {
        let image = decode_png(bytes)?;
        Ok(Self::new(name, test_name, browser, image))
    }

    /// Attach masks
    #[must_use]
    pub fn with_masks(mut self, masks: Vec<Region>) -> Self {
        self.masks = masks;
        self
    }

    /// Image width
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Image height
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Encode the raster as PNG
    pub fn to_png(&self) -> VisregResult<Vec<u8>> {
        encode_png(&self.image)
    }
}

/// Decode image bytes to RGBA8
pub fn decode_png(bytes: &[u8]) -> VisregResult<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| VisregError::ImageDecode {
            message: e.to_string(),
        })
}

/// Encode an RGBA8 raster as PNG
pub fn encode_png(image: &RgbaImage) -> VisregResult<Vec<u8>> {
    let mut buffer = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buffer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| VisregError::ImageEncode {
            message: e.to_string(),
        })?;
    Ok(buffer)
}
