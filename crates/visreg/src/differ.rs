//! Pixel-by-pixel image comparison.
//!
//! Colour distance is the YIQ-weighted squared delta between two pixels after
//! blending each over white by its alpha. No pair of colours exceeds
//! [`MAX_YIQ_DELTA`]; a pixel differs when its delta exceeds
//! `MAX_YIQ_DELTA * threshold²`.

use crate::geometry::Region;
use crate::result::{VisregError, VisregResult};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Maximum YIQ delta between any two pixels
pub const MAX_YIQ_DELTA: f64 = 35215.0;

/// Colours used when rendering the diff image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffRenderOptions {
    /// Colour for differing pixels
    pub diff_color: Rgba<u8>,
    /// Colour for masked pixels
    pub mask_color: Rgba<u8>,
    /// Opacity (0.0-1.0) of the faded grayscale baseline for unchanged pixels
    pub faded_alpha: f64,
}

impl Default for DiffRenderOptions {
    fn default() -> Self {
        Self {
            diff_color: Rgba([255, 0, 0, 255]),
            mask_color: Rgba([255, 0, 255, 255]),
            faded_alpha: 0.1,
        }
    }
}

/// Per-pixel record of which pixels differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl DiffMask {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Whether pixel (x, y) differs; out-of-bounds pixels never differ
    #[must_use]
    pub fn is_diff(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[(y as usize) * self.width as usize + x as usize]
    }

    /// Number of differing pixels
    #[must_use]
    pub fn count(&self) -> u64 {
        self.bits.iter().filter(|b| **b).count() as u64
    }

    /// (width, height)
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Counts produced by a comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Pixels over the colour threshold
    pub diff_pixels: u64,
    /// Pixels compared (excludes masked pixels)
    pub total_pixels: u64,
    /// Pixels skipped because they were masked
    pub masked_pixels: u64,
    /// Largest YIQ delta seen among compared pixels
    pub max_delta: f64,
}

impl DiffSummary {
    /// Percentage of compared pixels that differ (0.0-100.0)
    #[must_use]
    pub fn diff_percentage(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            (self.diff_pixels as f64 / self.total_pixels as f64) * 100.0
        }
    }

    /// Check if images are identical over the compared area
    #[must_use]
    pub const fn is_identical(&self) -> bool {
        self.diff_pixels == 0
    }
}

/// Result of diffing two rasters
#[derive(Debug, Clone)]
pub struct DiffOutput {
    /// Which pixels differ
    pub mask: DiffMask,
    /// Counts
    pub summary: DiffSummary,
    /// Rendered diff image
    pub image: RgbaImage,
}

/// Pure pixel comparator
#[derive(Debug, Clone, Copy)]
pub struct ImageDiffer {
    threshold: f64,
    render: DiffRenderOptions,
}

impl Default for ImageDiffer {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl ImageDiffer {
    /// Create a differ with a colour threshold in `[0, 1]` (clamped)
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            render: DiffRenderOptions::default(),
        }
    }

    /// Override diff image colours
    #[must_use]
    pub const fn with_render_options(mut self, render: DiffRenderOptions) -> Self {
        self.render = render;
        self
    }

    /// Colour threshold
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Largest delta that still counts as equal
    #[must_use]
    pub fn max_allowed_delta(&self) -> f64 {
        MAX_YIQ_DELTA * self.threshold * self.threshold
    }

    /// Compare `actual` against `baseline`, skipping pixels inside `masks`
    ///
    /// # Errors
    ///
    /// Returns [`VisregError::DimensionMismatch`] if the images differ in size
    pub fn diff(
        &self,
        baseline: &RgbaImage,
        actual: &RgbaImage,
        masks: &[Region],
    ) -> VisregResult<DiffOutput> {
        let (width, height) = baseline.dimensions();
        if actual.dimensions() != (width, height) {
            return Err(VisregError::DimensionMismatch {
                expected: (width, height),
                actual: actual.dimensions(),
            });
        }

        let masked = mask_bitmap(width, height, masks);
        let masked_pixels = masked.iter().filter(|m| **m).count() as u64;
        let max_allowed = self.max_allowed_delta();

        let mut mask = DiffMask::new(width, height);
        let mut image = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;
        let mut max_delta = 0.0f64;

        for (x, y, expected) in baseline.enumerate_pixels() {
            let idx = (y as usize) * width as usize + x as usize;
            if masked[idx] {
                image.put_pixel(x, y, self.render.mask_color);
                continue;
            }

            let got = actual.get_pixel(x, y);
            let delta = if expected == got {
                0.0
            } else {
                color_delta(*expected, *got)
            };
            max_delta = max_delta.max(delta);

            if delta > max_allowed {
                diff_pixels += 1;
                mask.bits[idx] = true;
                image.put_pixel(x, y, self.render.diff_color);
            } else {
                image.put_pixel(x, y, faded_gray(*expected, self.render.faded_alpha));
            }
        }

        let total_pixels = u64::from(width) * u64::from(height) - masked_pixels;

        Ok(DiffOutput {
            mask,
            summary: DiffSummary {
                diff_pixels,
                total_pixels,
                masked_pixels,
                max_delta,
            },
            image,
        })
    }
}

/// Number of pixels of a `width` x `height` raster left after `masks`
#[must_use]
pub fn compared_pixel_count(width: u32, height: u32, masks: &[Region]) -> u64 {
    let masked = mask_bitmap(width, height, masks)
        .into_iter()
        .filter(|m| *m)
        .count() as u64;
    u64::from(width) * u64::from(height) - masked
}

fn mask_bitmap(width: u32, height: u32, masks: &[Region]) -> Vec<bool> {
    let mut bitmap = vec![false; width as usize * height as usize];
    for region in masks.iter().filter_map(|r| r.clamp_to(width, height)) {
        for y in region.y..region.y + region.height {
            let row = y as usize * width as usize;
            for x in region.x..region.x + region.width {
                bitmap[row + x as usize] = true;
            }
        }
    }
    bitmap
}

fn blend(channel: u8, alpha: f64) -> f64 {
    255.0 + (f64::from(channel) - 255.0) * alpha
}

fn rgb_to_y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb_to_i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89
}

fn rgb_to_q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}

/// YIQ-weighted squared colour distance, `0.0..=MAX_YIQ_DELTA`
#[must_use]
pub fn color_delta(a: Rgba<u8>, b: Rgba<u8>) -> f64 {
    let Rgba([r1, g1, b1, a1]) = a;
    let Rgba([r2, g2, b2, a2]) = b;
    let alpha1 = f64::from(a1) / 255.0;
    let alpha2 = f64::from(a2) / 255.0;

    let (r1, g1, b1) = (blend(r1, alpha1), blend(g1, alpha1), blend(b1, alpha1));
    let (r2, g2, b2) = (blend(r2, alpha2), blend(g2, alpha2), blend(b2, alpha2));

    let y = rgb_to_y(r1, g1, b1) - rgb_to_y(r2, g2, b2);
    let i = rgb_to_i(r1, g1, b1) - rgb_to_i(r2, g2, b2);
    let q = rgb_to_q(r1, g1, b1) - rgb_to_q(r2, g2, b2);

    0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
}

fn faded_gray(pixel: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let Rgba([r, g, b, a]) = pixel;
    let luma = rgb_to_y(
        blend(r, f64::from(a) / 255.0),
        blend(g, f64::from(a) / 255.0),
        blend(b, f64::from(a) / 255.0),
    );
    let value = (255.0 + (luma - 255.0) * alpha).round().clamp(0.0, 255.0) as u8;
    Rgba([value, value, value, 255])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn solid(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(width, height, color)
    }

    #[test]
    fn test_color_delta_extremes() {
        assert_eq!(color_delta(WHITE, WHITE), 0.0);
        let black_white = color_delta(BLACK, WHITE);
        assert!(black_white > 32_000.0, "black/white delta was {black_white}");
        assert!(black_white <= MAX_YIQ_DELTA);
        let red_cyan = color_delta(Rgba([255, 0, 0, 255]), Rgba([0, 255, 255, 255]));
        assert!(red_cyan <= MAX_YIQ_DELTA);
    }

    #[test]
    fn test_transparent_pixels_blend_with_white() {
        let clear_black = Rgba([0, 0, 0, 0]);
        assert!(color_delta(clear_black, WHITE) < 1e-9);
    }

    #[test]
    fn test_identical_images() {
        let img = solid(10, 10, Rgba([128, 64, 32, 255]));
        let out = ImageDiffer::new(0.0).diff(&img, &img, &[]).unwrap();
        assert!(out.summary.is_identical());
        assert_eq!(out.summary.total_pixels, 100);
        assert_eq!(out.summary.diff_percentage(), 0.0);
        assert_eq!(out.mask.count(), 0);
    }

    #[test]
    fn test_different_images() {
        let out = ImageDiffer::new(0.1)
            .diff(&solid(2, 2, BLACK), &solid(2, 2, WHITE), &[])
            .unwrap();
        assert_eq!(out.summary.diff_pixels, 4);
        assert!((out.summary.diff_percentage() - 100.0).abs() < f64::EPSILON);
        assert!(out.mask.is_diff(1, 1));
    }

    #[test]
    fn test_small_change_under_threshold_is_equal() {
        let base = solid(10, 10, Rgba([100, 100, 100, 255]));
        let mut actual = base.clone();
        actual.put_pixel(0, 0, Rgba([105, 105, 105, 255]));

        let lenient = ImageDiffer::new(0.1).diff(&base, &actual, &[]).unwrap();
        assert_eq!(lenient.summary.diff_pixels, 0);

        let strict = ImageDiffer::new(0.0).diff(&base, &actual, &[]).unwrap();
        assert_eq!(strict.summary.diff_pixels, 1);
        assert!(strict.mask.is_diff(0, 0));
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = ImageDiffer::default()
            .diff(&solid(2, 2, WHITE), &solid(3, 2, WHITE), &[])
            .unwrap_err();
        match err {
            VisregError::DimensionMismatch { expected, actual } => {
                assert_eq!(expected, (2, 2));
                assert_eq!(actual, (3, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_masked_pixels_are_excluded_from_both_counts() {
        let base = solid(10, 10, WHITE);
        let mut actual = base.clone();
        for y in 0..5 {
            for x in 0..5 {
                actual.put_pixel(x, y, BLACK);
            }
        }
        actual.put_pixel(9, 9, BLACK);

        let out = ImageDiffer::new(0.1)
            .diff(&base, &actual, &[Region::new(0, 0, 5, 5)])
            .unwrap();
        assert_eq!(out.summary.masked_pixels, 25);
        assert_eq!(out.summary.total_pixels, 75);
        assert_eq!(out.summary.diff_pixels, 1);
        assert!(!out.mask.is_diff(2, 2));
        assert_eq!(*out.image.get_pixel(2, 2), DiffRenderOptions::default().mask_color);
    }

    #[test]
    fn test_overlapping_masks_count_once() {
        let img = solid(10, 10, WHITE);
        let out = ImageDiffer::default()
            .diff(
                &img,
                &img,
                &[Region::new(0, 0, 4, 4), Region::new(2, 2, 4, 4), Region::new(8, 8, 50, 50)],
            )
            .unwrap();
        // 16 + 16 - 4 overlap + 4 clamped
        assert_eq!(out.summary.masked_pixels, 32);
        assert_eq!(out.summary.total_pixels, 68);
    }

    #[test]
    fn test_compared_pixel_count_matches_diff_total() {
        let masks = [Region::new(0, 0, 10, 1), Region::new(5, 0, 10, 3)];
        let img = solid(10, 10, WHITE);
        let out = ImageDiffer::default().diff(&img, &img, &masks).unwrap();
        assert_eq!(compared_pixel_count(10, 10, &masks), out.summary.total_pixels);
        assert_eq!(compared_pixel_count(10, 10, &masks), 80);
        assert_eq!(compared_pixel_count(10, 10, &[]), 100);
        assert_eq!(compared_pixel_count(4, 4, &[Region::new(u32::MAX - 1, 0, 9, 9)]), 16);
    }

    #[test]
    fn test_fully_masked_image_reports_zero_percentage() {
        let out = ImageDiffer::default()
            .diff(&solid(3, 3, BLACK), &solid(3, 3, WHITE), &[Region::new(0, 0, 3, 3)])
            .unwrap();
        assert_eq!(out.summary.total_pixels, 0);
        assert_eq!(out.summary.diff_pixels, 0);
        assert_eq!(out.summary.diff_percentage(), 0.0);
    }

    #[test]
    fn test_diff_image_colors() {
        let base = solid(2, 1, WHITE);
        let mut actual = base.clone();
        actual.put_pixel(0, 0, BLACK);
        let out = ImageDiffer::new(0.1).diff(&base, &actual, &[]).unwrap();
        assert_eq!(*out.image.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        // Unchanged white stays white when faded.
        assert_eq!(*out.image.get_pixel(1, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_threshold_is_clamped() {
        assert_eq!(ImageDiffer::new(4.0).threshold(), 1.0);
        assert_eq!(ImageDiffer::new(-1.0).threshold(), 0.0);
    }

    fn arb_image(width: u32, height: u32) -> impl Strategy<Value = RgbaImage> {
        proptest::collection::vec(any::<u8>(), (width * height * 4) as usize)
            .prop_map(move |raw| RgbaImage::from_raw(width, height, raw).unwrap())
    }

    proptest! {
        #[test]
        fn prop_identical_images_never_differ(img in arb_image(6, 5), threshold in 0.0f64..=1.0) {
            let out = ImageDiffer::new(threshold).diff(&img, &img, &[]).unwrap();
            prop_assert_eq!(out.summary.diff_pixels, 0);
        }

        #[test]
        fn prop_counts_are_bounded(
            a in arb_image(6, 5),
            b in arb_image(6, 5),
            threshold in 0.0f64..=1.0,
            mx in 0u32..8, my in 0u32..8, mw in 0u32..8, mh in 0u32..8,
        ) {
            let out = ImageDiffer::new(threshold)
                .diff(&a, &b, &[Region::new(mx, my, mw, mh)])
                .unwrap();
            let s = out.summary;
            prop_assert!(s.diff_pixels <= s.total_pixels);
            prop_assert_eq!(s.total_pixels + s.masked_pixels, 30);
            prop_assert_eq!(out.mask.count(), s.diff_pixels);
            if s.total_pixels > 0 {
                let expected = s.diff_pixels as f64 / s.total_pixels as f64 * 100.0;
                prop_assert!((s.diff_percentage() - expected).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_diff_is_deterministic(a in arb_image(4, 4), b in arb_image(4, 4)) {
            let differ = ImageDiffer::new(0.05);
            let first = differ.diff(&a, &b, &[]).unwrap();
            let second = differ.diff(&a, &b, &[]).unwrap();
            prop_assert_eq!(first.mask, second.mask);
            prop_assert_eq!(first.image, second.image);
        }
    }
}
