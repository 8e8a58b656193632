//! Intensity transforms: Linear, Logarithmic, Power-law (gamma),
//! Histogram Equalization.
//!
//! Point operations are evaluated once per level into a 256-entry lookup
//! table and applied to every sample.

use serde::{Deserialize, Serialize};

use super::color::{rgb_to_ycbcr, ycbcr_to_rgb};
use super::core::{clamp_u8, histogram};
use crate::buffer::Image;
use crate::error::{ensure_positive, ensure_range, Result};

/// Upper bound shared by the alpha, c and gamma factors.
pub const MAX_FACTOR: f32 = 10.0;

/// Intensity transform and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum IntensityParams {
    /// `alpha * v + beta`.
    Linear { alpha: f32, beta: f32 },
    /// `c * 255 / ln(1 + max) * ln(1 + v)`.
    Log { c: f32 },
    /// `255 * (v / 255)^gamma`.
    Gamma { gamma: f32 },
    /// Flatten the histogram (on luma for RGB).
    Equalize,
}

impl Default for IntensityParams {
    fn default() -> Self {
        IntensityParams::Linear {
            alpha: 1.0,
            beta: 0.0,
        }
    }
}

impl IntensityParams {
    pub fn validate(&self) -> Result<()> {
        match *self {
            IntensityParams::Linear { alpha, beta } => {
                ensure_positive("alpha", alpha, MAX_FACTOR)?;
                ensure_range("beta", beta, -255.0, 255.0)
            }
            IntensityParams::Log { c } => ensure_positive("c", c, MAX_FACTOR),
            IntensityParams::Gamma { gamma } => ensure_positive("gamma", gamma, MAX_FACTOR),
            IntensityParams::Equalize => Ok(()),
        }
    }
}

/// Apply an intensity transform.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Transform selection
///
/// # Returns
/// Transformed image with the input's shape
pub fn intensity_transform(image: &Image, params: &IntensityParams) -> Result<Image> {
    params.validate()?;
    Ok(match *params {
        IntensityParams::Linear { alpha, beta } => {
            apply_lut(image, &build_lut(|v| alpha * v + beta))
        }
        IntensityParams::Log { c } => {
            let max = image.as_array().iter().copied().max().unwrap_or(0);
            if max == 0 {
                return Ok(image.clone());
            }
            let scale = c * 255.0 / (1.0 + max as f32).ln();
            apply_lut(image, &build_lut(|v| scale * (1.0 + v).ln()))
        }
        IntensityParams::Gamma { gamma } => {
            apply_lut(image, &build_lut(|v| 255.0 * (v / 255.0).powf(gamma)))
        }
        IntensityParams::Equalize => equalize(image),
    })
}

/// Tabulate `f` over the 256 input levels.
fn build_lut<F>(f: F) -> [u8; 256]
where
    F: Fn(f32) -> f32,
{
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = clamp_u8(f(i as f32));
    }
    lut
}

fn apply_lut(image: &Image, lut: &[u8; 256]) -> Image {
    image.map_samples(|v| lut[v as usize])
}

// ============================================================================
// Histogram Equalization
// ============================================================================

/// Lookup table mapping each level to `round(255 * CDF(level))`.
pub(crate) fn equalization_lut(hist: &[u64; 256]) -> [u8; 256] {
    let total: u64 = hist.iter().sum();
    let mut lut = [0u8; 256];
    if total == 0 {
        return lut;
    }
    let mut cumulative = 0u64;
    for (level, &count) in hist.iter().enumerate() {
        cumulative += count;
        lut[level] = clamp_u8(255.0 * cumulative as f32 / total as f32);
    }
    lut
}

/// Grayscale images are equalized directly; RGB images are equalized on the
/// Y plane of YCbCr with Cb/Cr untouched.
fn equalize(image: &Image) -> Image {
    if image.is_gray() {
        let lut = equalization_lut(&histogram(image.channel(0)));
        return apply_lut(image, &lut);
    }

    let mut ycbcr = rgb_to_ycbcr(image);
    let luma = ycbcr[0].mapv(clamp_u8);
    let lut = equalization_lut(&histogram(luma.view()));
    ycbcr[0] = luma.mapv(|v| lut[v as usize] as f32);
    ycbcr_to_rgb(&ycbcr)
}
