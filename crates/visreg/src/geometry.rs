//! Regions, bounding boxes, masks and viewports.

use serde::{Deserialize, Serialize};

/// Rectangular pixel region (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Width of region
    pub width: u32,
    /// Height of region
    pub height: u32,
}

impl Region {
    /// Create a new region
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check if a point is within this region
    #[must_use]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && (px as u64) < self.x as u64 + self.width as u64
            && py >= self.y
            && (py as u64) < self.y as u64 + self.height as u64
    }

    /// Number of pixels covered
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the region covers no pixels
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersect with a `width` x `height` image, `None` when nothing overlaps
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height || self.is_empty() {
            return None;
        }
        let right = (u64::from(self.x) + u64::from(self.width)).min(u64::from(width)) as u32;
        let bottom = (u64::from(self.y) + u64::from(self.height)).min(u64::from(height)) as u32;
        Some(Self::new(self.x, self.y, right - self.x, bottom - self.y))
    }

    /// Move into the coordinate space of a capture whose origin is `origin`
    /// and whose pixels are `scale` times the page's CSS pixels.
    ///
    /// Returns `None` when the region lies entirely before the origin.
    #[must_use]
    pub fn to_capture_space(&self, origin: (u32, u32), scale: f64) -> Option<Self> {
        let (ox, oy) = (u64::from(origin.0), u64::from(origin.1));
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);
        if right <= ox || bottom <= oy {
            return None;
        }
        let x = u64::from(self.x).saturating_sub(ox);
        let y = u64::from(self.y).saturating_sub(oy);
        let (right, bottom) = (right - ox, bottom - oy);

        if (scale - 1.0).abs() < f64::EPSILON {
            return Some(Self::from_edges(x, y, right, bottom));
        }
        let scaled = |v: u64, round: fn(f64) -> f64| round(v as f64 * scale).max(0.0) as u64;
        Some(Self::from_edges(
            scaled(x, f64::floor),
            scaled(y, f64::floor),
            scaled(right, f64::ceil),
            scaled(bottom, f64::ceil),
        ))
    }

    /// Build from edge coordinates, saturating anything past `u32::MAX`
    fn from_edges(left: u64, top: u64, right: u64, bottom: u64) -> Self {
        let narrow = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
        let (x, y) = (narrow(left), narrow(top));
        Self::new(
            x,
            y,
            narrow(right).saturating_sub(x),
            narrow(bottom).saturating_sub(y),
        )
    }
}

/// Element box as reported by a page, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Visible means a positive area
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Smallest pixel region that fully covers this box
    #[must_use]
    pub fn to_region(&self) -> Region {
        let x = self.x.max(0.0).floor();
        let y = self.y.max(0.0).floor();
        let right = (self.x + self.width).max(0.0).ceil();
        let bottom = (self.y + self.height).max(0.0).ceil();
        Region::new(
            x as u32,
            y as u32,
            (right - x).max(0.0) as u32,
            (bottom - y).max(0.0) as u32,
        )
    }
}

/// Something to exclude from comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaskTarget {
    /// Fixed region in page coordinates
    Region(Region),
    /// Element resolved to its bounding box at capture time
    Selector {
        /// CSS selector
        selector: String,
    },
}

impl MaskTarget {
    /// Mask an element by selector
    #[must_use]
    pub fn selector(selector: impl Into<String>) -> Self {
        Self::Selector {
            selector: selector.into(),
        }
    }
}

impl From<Region> for MaskTarget {
    fn from(region: Region) -> Self {
        Self::Region(region)
    }
}

/// Named viewport for responsive captures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Name used as snapshot suffix
    pub name: String,
    /// Viewport width in CSS pixels
    pub width: u32,
    /// Viewport height in CSS pixels
    pub height: u32,
}

impl Viewport {
    /// Create a named viewport
    #[must_use]
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
        }
    }

    /// Phone portrait
    #[must_use]
    pub fn mobile() -> Self {
        Self::new("mobile", 375, 667)
    }

    /// Tablet portrait
    #[must_use]
    pub fn tablet() -> Self {
        Self::new("tablet", 768, 1024)
    }

    /// Desktop 1080p
    #[must_use]
    pub fn desktop() -> Self {
        Self::new("desktop", 1920, 1080)
    }

    /// Mobile, tablet and desktop
    #[must_use]
    pub fn standard_set() -> Vec<Self> {
        vec![Self::mobile(), Self::tablet(), Self::desktop()]
    }
}
