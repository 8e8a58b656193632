//! Thresholding: binary, Otsu, adaptive.
//!
//! All policies binarize the luminance of the input into `{0, max_value}`
//! and replicate the result into the input's channel count.

use log::{debug, warn};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use super::core::{convolve, convolve_separable, histogram, replicate_plane, Kernel, MAX_KERNEL_SIZE};
use crate::buffer::Image;
use crate::error::{ensure_odd_kernel, FilterError, Result};

/// Cut used when Otsu's method has nothing to separate.
pub const FALLBACK_THRESHOLD: u8 = 127;

/// How the local mean of the adaptive policy is weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveMethod {
    #[default]
    Mean,
    Gaussian,
}

/// Thresholding policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Fixed global cutoff.
    Binary { threshold: u8 },
    /// Automatic global cutoff from the histogram.
    Otsu,
    /// Per-pixel cutoff from a local neighbourhood.
    Adaptive {
        block_size: usize,
        c: f32,
        #[serde(default)]
        weighting: AdaptiveMethod,
    },
}

/// Parameters for [`threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdParams {
    #[serde(flatten)]
    pub method: ThresholdMethod,
    /// Value written for pixels above the cutoff.
    #[serde(default = "default_max_value")]
    pub max_value: u8,
}

fn default_max_value() -> u8 {
    255
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::Binary { threshold: 127 },
            max_value: 255,
        }
    }
}

impl ThresholdParams {
    pub fn validate(&self) -> Result<()> {
        if let ThresholdMethod::Adaptive { block_size, c, .. } = self.method {
            ensure_odd_kernel("block_size", block_size, MAX_KERNEL_SIZE)?;
            if !c.is_finite() {
                return Err(FilterError::invalid("adaptive bias c must be finite"));
            }
        }
        Ok(())
    }
}

/// Binarize an image.
///
/// # Arguments
/// * `image` - Grayscale or RGB image (RGB is reduced to luminance)
/// * `params` - Policy and output level
///
/// # Returns
/// Image containing only 0 and `max_value`, same shape as the input
pub fn threshold(image: &Image, params: &ThresholdParams) -> Result<Image> {
    params.validate()?;
    let luma = image.to_luma();
    let max_value = params.max_value;

    let binary = match params.method {
        ThresholdMethod::Binary { threshold } => binarize(&luma, threshold, max_value),
        ThresholdMethod::Otsu => {
            let cut = otsu_threshold(&luma).unwrap_or_else(|| {
                warn!("otsu: degenerate histogram, falling back to {FALLBACK_THRESHOLD}");
                FALLBACK_THRESHOLD
            });
            binarize(&luma, cut, max_value)
        }
        ThresholdMethod::Adaptive {
            block_size,
            c,
            weighting,
        } => adaptive(&luma, block_size, c, weighting, max_value),
    };

    Ok(replicate_plane(&binary, image.channels()))
}

pub(crate) fn binarize(luma: &Array2<u8>, cut: u8, max_value: u8) -> Array2<u8> {
    luma.mapv(|v| if v > cut { max_value } else { 0 })
}

/// Otsu's optimal global threshold.
///
/// Evaluates all 256 candidate levels and keeps those minimizing the weighted
/// within-class variance (equivalently, maximizing the between-class
/// variance). When several consecutive levels are optimal the centre of that
/// plateau is returned, so two separated modes are split halfway.
///
/// # Returns
/// `None` when the histogram has fewer than two occupied levels
pub fn otsu_threshold(luma: &Array2<u8>) -> Option<u8> {
    let hist = histogram(luma.view());
    if hist.iter().filter(|&&n| n > 0).count() < 2 {
        return None;
    }

    let total = luma.len() as f64;
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &n)| i as f64 * n as f64).sum();

    let mut weight_bg = 0.0f64;
    let mut sum_bg = 0.0f64;
    let mut between = [0.0f64; 256];

    for t in 0..256 {
        weight_bg += hist[t] as f64;
        sum_bg += t as f64 * hist[t] as f64;
        let weight_fg = total - weight_bg;
        if weight_bg == 0.0 || weight_fg == 0.0 {
            continue;
        }
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let diff = mean_bg - mean_fg;
        between[t] = weight_bg * weight_fg * diff * diff;
    }

    let best = between.iter().cloned().fold(0.0f64, f64::max);
    if best <= 0.0 {
        return None;
    }

    let tolerance = best * 1e-12;
    let first = between.iter().position(|&v| best - v <= tolerance)?;
    let last = between.iter().rposition(|&v| best - v <= tolerance)?;
    let cut = ((first + last) / 2) as u8;
    debug!("otsu: optimal plateau [{first}, {last}], cut at {cut}");
    Some(cut)
}

fn adaptive(
    luma: &Array2<u8>,
    block_size: usize,
    c: f32,
    weighting: AdaptiveMethod,
    max_value: u8,
) -> Array2<u8> {
    let plane = luma.mapv(|v| v as f32);
    let local_mean = match weighting {
        AdaptiveMethod::Mean => {
            let box_kernel = vec![1.0 / block_size as f32; block_size];
            convolve_separable(plane.view(), &box_kernel, &box_kernel)
        }
        AdaptiveMethod::Gaussian => match Kernel::gaussian(block_size, 0.0) {
            Ok(kernel) => convolve(plane.view(), &kernel),
            // block_size was validated above
            Err(_) => plane.clone(),
        },
    };

    let mut out = Array2::<u8>::zeros(luma.dim());
    Zip::from(&mut out)
        .and(&plane)
        .and(&local_mean)
        .par_for_each(|o, &v, &m| {
            if v > m - c {
                *o = max_value;
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bimodal() -> Image {
        Image::from_fn(10, 10, 1, |y, _, _| if y < 5 { 50 } else { 200 }).unwrap()
    }

    #[test]
    fn test_otsu_splits_bimodal_strictly_between() {
        let img = bimodal();
        let cut = otsu_threshold(&img.to_luma()).unwrap();
        assert!(cut > 50 && cut < 200, "cut was {cut}");

        let params = ThresholdParams {
            method: ThresholdMethod::Otsu,
            max_value: 255,
        };
        let result = threshold(&img, &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 0 || v == 255));
        assert_eq!(result.get(0, 0, 0), 0);
        assert_eq!(result.get(0, 9, 0), 255);
    }

    #[test]
    fn test_otsu_constant_image_falls_back() {
        let img = Image::filled(4, 4, 1, 90).unwrap();
        assert_eq!(otsu_threshold(&img.to_luma()), None);
        let params = ThresholdParams {
            method: ThresholdMethod::Otsu,
            max_value: 255,
        };
        let result = threshold(&img, &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_binary_is_idempotent() {
        let img = Image::from_fn(8, 8, 3, |y, x, c| (x * 31 + y * 7 + c * 50) as u8).unwrap();
        let params = ThresholdParams {
            method: ThresholdMethod::Binary { threshold: 100 },
            max_value: 255,
        };
        let once = threshold(&img, &params).unwrap();
        let twice = threshold(&once, &params).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.channels(), 3);
    }

    #[test]
    fn test_binary_uses_max_value() {
        let img = Image::from_fn(4, 1, 1, |_, x, _| (x * 80) as u8).unwrap();
        let params = ThresholdParams {
            method: ThresholdMethod::Binary { threshold: 100 },
            max_value: 200,
        };
        let result = threshold(&img, &params).unwrap();
        assert_eq!(result.to_raw(), vec![0, 0, 200, 200]);
    }

    #[test]
    fn test_adaptive_handles_gradient_lighting() {
        // Dark text-like dots on a strong horizontal ramp
        let img = Image::from_fn(32, 8, 1, |y, x, _| {
            let base = (x * 7) as u8;
            if y == 4 && x % 8 == 4 {
                base.saturating_sub(60)
            } else {
                base
            }
        })
        .unwrap();
        let params = ThresholdParams {
            method: ThresholdMethod::Adaptive {
                block_size: 5,
                c: 5.0,
                weighting: AdaptiveMethod::Mean,
            },
            max_value: 255,
        };
        let result = threshold(&img, &params).unwrap();
        assert_eq!(result.get(12, 4, 0), 0);
        assert_eq!(result.get(28, 4, 0), 0);
        assert_eq!(result.get(12, 1, 0), 255);
    }

    #[test]
    fn test_adaptive_rejects_even_block() {
        let params = ThresholdParams {
            method: ThresholdMethod::Adaptive {
                block_size: 6,
                c: 2.0,
                weighting: AdaptiveMethod::Gaussian,
            },
            max_value: 255,
        };
        assert!(threshold(&bimodal(), &params).is_err());
    }
}
