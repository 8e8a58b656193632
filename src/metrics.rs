//! Quality metrics and summary statistics for comparing two images.
//!
//! All metrics work on raw samples across every channel. Images must have
//! identical shapes.

use serde::Serialize;

use crate::buffer::Image;
use crate::error::{FilterError, Result};

/// SSIM stabilizers for 8-bit data: `(0.01 * 255)^2` and `(0.03 * 255)^2`.
pub const SSIM_C1: f64 = 6.5025;
pub const SSIM_C2: f64 = 58.5225;

/// Global statistics of one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageStats {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub pixel_count: usize,
    /// Mean over all samples.
    pub mean: f64,
    /// Population standard deviation over all samples.
    pub std: f64,
}

impl ImageStats {
    pub fn of(image: &Image) -> Self {
        let (mean, var) = mean_var(image.as_array().iter().map(|&v| v as f64));
        ImageStats {
            width: image.width(),
            height: image.height(),
            channels: image.channels(),
            pixel_count: image.pixel_count(),
            mean,
            std: var.sqrt(),
        }
    }
}

/// Side-by-side comparison of an original and a processed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub original: ImageStats,
    pub processed: ImageStats,
    pub mse: f64,
    /// Decibels; `f64::INFINITY` for identical images.
    pub psnr: f64,
    pub ssim: f64,
}

/// Compute every metric at once.
pub fn compare(original: &Image, processed: &Image) -> Result<Comparison> {
    let mse = mse(original, processed)?;
    Ok(Comparison {
        original: ImageStats::of(original),
        processed: ImageStats::of(processed),
        mse,
        psnr: psnr_from_mse(mse),
        ssim: ssim(original, processed)?,
    })
}

fn ensure_same_shape(a: &Image, b: &Image) -> Result<()> {
    if a.as_array().dim() != b.as_array().dim() {
        return Err(FilterError::invalid(format!(
            "image shapes differ: {:?} vs {:?}",
            a.as_array().dim(),
            b.as_array().dim()
        )));
    }
    Ok(())
}

/// Mean squared error over all samples.
pub fn mse(a: &Image, b: &Image) -> Result<f64> {
    ensure_same_shape(a, b)?;
    let sum: f64 = a
        .as_array()
        .iter()
        .zip(b.as_array().iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum();
    Ok(sum / a.as_array().len() as f64)
}

/// Peak signal-to-noise ratio in dB against a peak of 255.
pub fn psnr(a: &Image, b: &Image) -> Result<f64> {
    Ok(psnr_from_mse(mse(a, b)?))
}

fn psnr_from_mse(mse: f64) -> f64 {
    if mse == 0.0 {
        f64::INFINITY
    } else {
        20.0 * (255.0 / mse.sqrt()).log10()
    }
}

/// Global structural similarity, averaged over channels.
///
/// Each channel contributes one SSIM value computed from its global means,
/// variances and covariance.
pub fn ssim(a: &Image, b: &Image) -> Result<f64> {
    ensure_same_shape(a, b)?;
    let channels = a.channels();
    let total: f64 = (0..channels)
        .map(|c| {
            let xa = a.channel(c);
            let xb = b.channel(c);
            let (mu_a, var_a) = mean_var(xa.iter().map(|&v| v as f64));
            let (mu_b, var_b) = mean_var(xb.iter().map(|&v| v as f64));
            let n = xa.len() as f64;
            let cov = xa
                .iter()
                .zip(xb.iter())
                .map(|(&p, &q)| (p as f64 - mu_a) * (q as f64 - mu_b))
                .sum::<f64>()
                / n;
            ((2.0 * mu_a * mu_b + SSIM_C1) * (2.0 * cov + SSIM_C2))
                / ((mu_a * mu_a + mu_b * mu_b + SSIM_C1) * (var_a + var_b + SSIM_C2))
        })
        .sum();
    Ok(total / channels as f64)
}

/// Population mean and variance.
pub(crate) fn mean_var(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (n, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_images() {
        let img = Image::from_fn(8, 8, 3, |y, x, c| (x * 30 + y + c) as u8).unwrap();
        assert_eq!(mse(&img, &img).unwrap(), 0.0);
        assert_eq!(psnr(&img, &img).unwrap(), f64::INFINITY);
        assert!((ssim(&img, &img).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_values() {
        let a = Image::filled(4, 4, 1, 100).unwrap();
        let b = Image::filled(4, 4, 1, 110).unwrap();
        assert_eq!(mse(&a, &b).unwrap(), 100.0);
        // 20 * log10(255 / 10)
        assert!((psnr(&a, &b).unwrap() - 28.1308).abs() < 1e-3);
    }

    #[test]
    fn test_ssim_drops_with_noise() {
        let a = Image::from_fn(16, 16, 1, |y, x, _| ((x + y) * 8) as u8).unwrap();
        let b = a.map_samples(|v| v.saturating_add(3));
        let c = Image::from_fn(16, 16, 1, |y, x, _| ((x * 37 + y * 91) % 256) as u8).unwrap();
        let close = ssim(&a, &b).unwrap();
        let far = ssim(&a, &c).unwrap();
        assert!(close > 0.95);
        assert!(far < close);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Image::filled(4, 4, 1, 0).unwrap();
        let b = Image::filled(4, 4, 3, 0).unwrap();
        assert!(matches!(mse(&a, &b), Err(FilterError::InvalidParameter(_))));
        assert!(ssim(&a, &b).is_err());
        assert!(compare(&a, &b).is_err());
    }

    #[test]
    fn test_stats() {
        let img = Image::from_fn(2, 1, 1, |_, x, _| if x == 0 { 10 } else { 30 }).unwrap();
        let stats = ImageStats::of(&img);
        assert_eq!(stats.pixel_count, 2);
        assert_eq!(stats.mean, 20.0);
        assert_eq!(stats.std, 10.0);
    }
}
