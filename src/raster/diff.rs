//! Masked perceptual pixel comparison.
//!
//! Colours are compared in YIQ space after blending over white, so the
//! threshold behaves like a perceptual distance rather than a per-channel
//! epsilon. Pixels whose mask pixel is non-transparent are never counted as
//! differences.

use image::{Rgba, RgbaImage};

use crate::model::{MatchStatus, Screenshot};

/// Maximum possible YIQ delta between two colours.
const MAX_YIQ_DELTA: f64 = 35215.0;

const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const MASKED_DIFF_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);
const UNUSED_MASK_COLOR: Rgba<u8> = Rgba([200, 200, 255, 255]);
const GRAY_ALPHA: f64 = 0.1;

/// Outcome of comparing an expected raster against an actual one.
#[derive(Debug, Clone)]
pub struct DiffResult {
    /// Pixels that differ and are not covered by the mask
    pub differing_pixels: u64,
    /// Pixels covered by the mask
    pub masked_pixels: u64,
    /// Mask-covered pixels that were identical anyway
    pub unused_masked_pixels: u64,
    pub total_pixels: u64,
    /// False when `actual` had different dimensions and was replaced by a blank canvas
    pub dimensions_match: bool,
    /// Visualisation: red for differences, yellow for masked differences
    pub diff_image: Screenshot,
}

impl DiffResult {
    /// Mask-covered pixels that actually hid a difference.
    pub fn consumed_mask_pixels(&self) -> u64 {
        self.masked_pixels - self.unused_masked_pixels
    }

    pub fn is_match(&self) -> bool {
        self.differing_pixels == 0
    }

    /// `Pass`/`Allow` for a match, `None` while differences remain.
    pub fn classification(&self) -> Option<MatchStatus> {
        if !self.is_match() {
            return None;
        }
        if self.masked_pixels > 0 {
            Some(MatchStatus::Allow)
        } else {
            Some(MatchStatus::Pass)
        }
    }
}

/// Compare `actual` against `expected`, ignoring pixels covered by `mask`.
///
/// `threshold` is in `0.0..=1.0`; larger values tolerate more colour drift.
/// When the dimensions differ, `actual` is treated as a blank canvas of the
/// expected size and every pixel is reported as differing.
pub fn diff(
    expected: &Screenshot,
    actual: &Screenshot,
    mask: Option<&Screenshot>,
    threshold: f64,
) -> DiffResult {
    let (width, height) = expected.dimensions();
    let total_pixels = u64::from(width) * u64::from(height);

    if actual.dimensions() != expected.dimensions() {
        tracing::debug!(
            expected_width = width,
            expected_height = height,
            actual_width = actual.width(),
            actual_height = actual.height(),
            "Screenshot size mismatch, comparing against blank canvas"
        );
        return DiffResult {
            differing_pixels: total_pixels,
            masked_pixels: 0,
            unused_masked_pixels: 0,
            total_pixels,
            dimensions_match: false,
            diff_image: Screenshot::filled(width, height, DIFF_COLOR),
        };
    }

    let threshold = threshold.clamp(0.0, 1.0);
    let max_delta = MAX_YIQ_DELTA * threshold * threshold;
    let expected_px = expected.image();
    let actual_px = actual.image();
    let mut out = RgbaImage::new(width, height);

    let mut differing_pixels = 0u64;
    let mut masked_pixels = 0u64;
    let mut unused_masked_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = expected_px.get_pixel(x, y);
            let b = actual_px.get_pixel(x, y);
            let differs = a != b && color_delta(a, b) > max_delta;
            let masked = mask.is_some_and(|m| is_masked(m, x, y));

            let color = match (masked, differs) {
                (true, true) => {
                    masked_pixels += 1;
                    MASKED_DIFF_COLOR
                }
                (true, false) => {
                    masked_pixels += 1;
                    unused_masked_pixels += 1;
                    UNUSED_MASK_COLOR
                }
                (false, true) => {
                    differing_pixels += 1;
                    DIFF_COLOR
                }
                (false, false) => gray_pixel(a),
            };
            out.put_pixel(x, y, color);
        }
    }

    DiffResult {
        differing_pixels,
        masked_pixels,
        unused_masked_pixels,
        total_pixels,
        dimensions_match: true,
        diff_image: Screenshot::new(out),
    }
}

fn is_masked(mask: &Screenshot, x: u32, y: u32) -> bool {
    x < mask.width() && y < mask.height() && mask.image().get_pixel(x, y)[3] != 0
}

fn blend(channel: u8, alpha: f64) -> f64 {
    255.0 + (f64::from(channel) - 255.0) * alpha
}

fn yiq(px: &Rgba<u8>) -> (f64, f64, f64) {
    let alpha = f64::from(px[3]) / 255.0;
    let r = blend(px[0], alpha);
    let g = blend(px[1], alpha);
    let b = blend(px[2], alpha);
    (
        r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23,
        r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89,
        r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94,
    )
}

/// Squared YIQ distance, in `0.0..=MAX_YIQ_DELTA`.
fn color_delta(a: &Rgba<u8>, b: &Rgba<u8>) -> f64 {
    let (y1, i1, q1) = yiq(a);
    let (y2, i2, q2) = yiq(b);
    let (dy, di, dq) = (y1 - y2, i1 - i2, q1 - q2);
    0.5053 * dy * dy + 0.299 * di * di + 0.1957 * dq * dq
}

fn gray_pixel(px: &Rgba<u8>) -> Rgba<u8> {
    let (luma, _, _) = yiq(px);
    let value = (255.0 + (luma - 255.0) * GRAY_ALPHA).clamp(0.0, 255.0) as u8;
    Rgba([value, value, value, 255])
}
