//! Frame validation utilities for test pattern verification.
//!
//! These check converted [`Picture`]s and captured [`FrameMetadata`] against
//! the patterns a virtual camera (or the in-crate mock) produces. Useful for
//! integration testing with virtual cameras.

use crate::error::{Error, Result};
use crate::picture::Picture;
use crate::traits::FrameMetadata;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the BT.601 RGB values of the YUV bars a virtual camera emits.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u32 = 15;

/// Smallest left-to-right luminance rise accepted as a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// Validates that a picture contains the SMPTE color bar pattern.
///
/// Samples the center of each of the 8 vertical stripes on the middle row.
/// The picture must be in an RGB-family or gray format.
///
/// # Errors
///
/// Returns [`Error::Validation`] if a pixel cannot be read or any bar is
/// off by more than the tolerance.
pub fn validate_color_bars(picture: &Picture) -> Result<()> {
    let bar_width = picture.width() / 8;
    let center_y = picture.height() / 2;

    for (bar_idx, expected_rgb) in (0u32..).zip(SMPTE_COLOR_BARS) {
        let sample_x = bar_idx * bar_width + bar_width / 2;

        let actual_rgb = picture.rgb_at(sample_x, center_y).ok_or_else(|| {
            Error::Validation(format!(
                "cannot read pixel at ({sample_x}, {center_y}) of a {:?} picture",
                picture.format()
            ))
        })?;

        if !colors_match(actual_rgb, expected_rgb, COLOR_TOLERANCE) {
            return Err(Error::Validation(format!(
                "color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a picture contains a horizontal gradient.
///
/// Luminance along the middle row must not fall (small rounding dips are
/// allowed) and must rise by a clear margin from left to right.
///
/// # Errors
///
/// Returns [`Error::Validation`] if a pixel cannot be read, the luminance
/// falls, or the picture is close to a solid color.
pub fn validate_gradient(picture: &Picture) -> Result<()> {
    let center_y = picture.height() / 2;
    let sample_step = (picture.width() / 64).max(1) as usize;

    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    for x in (0..picture.width()).step_by(sample_step) {
        let (r, g, b) = picture.rgb_at(x, center_y).ok_or_else(|| {
            Error::Validation(format!("cannot read pixel at ({x}, {center_y})"))
        })?;

        // Rec. 601 luma
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = prev {
            if luminance < prev - 1.0 {
                return Err(Error::Validation(format!(
                    "gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }
        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, prev) {
        let rise = last - first;
        if rise < MIN_GRADIENT_RISE {
            return Err(Error::Validation(format!(
                "insufficient luminance change for gradient: {rise} \
                 (expected at least {MIN_GRADIENT_RISE})"
            )));
        }
    }

    Ok(())
}

/// Validates that captured frames carry consecutive sequence numbers.
///
/// # Errors
///
/// Returns [`Error::Validation`] if `frames` is empty or any sequence number
/// does not follow its predecessor by exactly one.
pub fn validate_frame_sequence(frames: &[FrameMetadata]) -> Result<()> {
    if frames.is_empty() {
        return Err(Error::Validation(
            "cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let expected = prev.sequence.wrapping_add(1);
            if curr.sequence != expected {
                return Err(Error::Validation(format!(
                    "frame sequence gap at index {}: expected {expected}, got {}",
                    i + 1,
                    curr.sequence
                )));
            }
        }
    }

    Ok(())
}

/// Whether every channel of `actual` is within `tolerance` of `expected`.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
