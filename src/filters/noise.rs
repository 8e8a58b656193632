//! Noise filters: Add Noise (Gaussian, salt-and-pepper, speckle) and
//! noise reduction (median, Gaussian, bilateral).
//!
//! Every channel is processed; neighbourhood filters replicate the border.

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};

use super::blur::gaussian_blur_unchecked;
use super::core::{clamp_index, clamp_u8, MAX_KERNEL_SIZE};
use crate::buffer::Image;
use crate::error::{ensure_odd_kernel, ensure_positive, ensure_range, Result};

// ============================================================================
// Simple RNG (deterministic for reproducible noise)
// ============================================================================

/// Simple linear congruential generator for deterministic noise.
/// Uses MINSTD parameters.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        SimpleRng {
            // State stays in [1, 2^31 - 2]; 0 and the modulus are fixed points.
            state: seed % 2147483646 + 1,
        }
    }

    /// Generate next random u32.
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(48271) % 2147483647;
        self.state as u32
    }

    /// Generate uniform random f32 in [0, 1).
    pub(crate) fn next_f32(&mut self) -> f32 {
        (self.next_u32() - 1) as f32 / 2147483646.0f32
    }

    /// Generate Gaussian random f32 using Box-Muller transform.
    pub(crate) fn next_gaussian(&mut self) -> f32 {
        let u1 = self.next_f32().max(1e-10);
        let u2 = self.next_f32();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
    }
}

// ============================================================================
// Add Noise
// ============================================================================

/// Noise model for [`add_noise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoiseKind {
    /// Additive N(0, intensity * 255).
    #[default]
    Gaussian,
    /// A fraction `intensity` of pixels forced to 0 or 255.
    SaltPepper,
    /// Multiplicative: v + v * N(0, intensity).
    Speckle,
}

/// Parameters for [`add_noise`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    pub kind: NoiseKind,
    /// Strength in (0, 1].
    pub intensity: f32,
    /// Seed of the deterministic generator.
    pub seed: u64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            kind: NoiseKind::Gaussian,
            intensity: 0.1,
            seed: 0,
        }
    }
}

impl NoiseParams {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("intensity", self.intensity, 1.0)
    }
}

/// Add noise to an image.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Noise model, intensity and seed
///
/// # Returns
/// Noisy image with same shape; identical seeds give identical output
pub fn add_noise(image: &Image, params: &NoiseParams) -> Result<Image> {
    params.validate()?;
    let input = image.view();
    let (height, width, channels) = input.dim();
    let mut output = Array3::<u8>::zeros((height, width, channels));
    let mut rng = SimpleRng::new(params.seed);
    let intensity = params.intensity;

    match params.kind {
        NoiseKind::Gaussian => {
            let scale = intensity * 255.0;
            for ((y, x, c), out) in output.indexed_iter_mut() {
                let v = input[[y, x, c]] as f32 + rng.next_gaussian() * scale;
                *out = clamp_u8(v);
            }
        }
        NoiseKind::SaltPepper => {
            output.assign(&input);
            for y in 0..height {
                for x in 0..width {
                    if rng.next_f32() < intensity {
                        let value = if rng.next_f32() < 0.5 { 0 } else { 255 };
                        for c in 0..channels {
                            output[[y, x, c]] = value;
                        }
                    }
                }
            }
        }
        NoiseKind::Speckle => {
            for ((y, x, c), out) in output.indexed_iter_mut() {
                let v = input[[y, x, c]] as f32;
                *out = clamp_u8(v + v * rng.next_gaussian() * intensity);
            }
        }
    }

    Ok(Image::from_array(output))
}

// ============================================================================
// Noise Reduction
// ============================================================================

/// Noise reduction method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DenoiseParams {
    /// Median of a square neighbourhood.
    Median { kernel_size: usize },
    /// Gaussian smoothing.
    Gaussian { kernel_size: usize, sigma: f32 },
    /// Edge-preserving bilateral filter.
    Bilateral {
        /// Neighbourhood diameter (odd, ≥ 3).
        diameter: usize,
        sigma_color: f32,
        sigma_space: f32,
    },
}

impl Default for DenoiseParams {
    fn default() -> Self {
        DenoiseParams::Median { kernel_size: 5 }
    }
}

impl DenoiseParams {
    pub fn validate(&self) -> Result<()> {
        match *self {
            DenoiseParams::Median { kernel_size } => {
                ensure_odd_kernel("kernel_size", kernel_size, 31)
            }
            DenoiseParams::Gaussian { kernel_size, sigma } => {
                ensure_odd_kernel("kernel_size", kernel_size, MAX_KERNEL_SIZE)?;
                ensure_range("sigma", sigma, 0.0, 100.0)
            }
            DenoiseParams::Bilateral {
                diameter,
                sigma_color,
                sigma_space,
            } => {
                ensure_odd_kernel("diameter", diameter, 31)?;
                ensure_positive("sigma_color", sigma_color, 1000.0)?;
                ensure_positive("sigma_space", sigma_space, 1000.0)
            }
        }
    }
}

/// Reduce noise with the selected method.
pub fn reduce_noise(image: &Image, params: &DenoiseParams) -> Result<Image> {
    params.validate()?;
    Ok(match *params {
        DenoiseParams::Median { kernel_size } => median(image, kernel_size / 2),
        DenoiseParams::Gaussian { kernel_size, sigma } => {
            gaussian_blur_unchecked(image, kernel_size, sigma)
        }
        DenoiseParams::Bilateral {
            diameter,
            sigma_color,
            sigma_space,
        } => bilateral(image, diameter / 2, sigma_color, sigma_space),
    })
}

/// Median filter. Removes salt-and-pepper noise while preserving edges.
pub(crate) fn median(image: &Image, radius: usize) -> Image {
    let input = image.view();
    let (height, width, channels) = input.dim();
    let mut output = Array3::<u8>::zeros((height, width, channels));
    let r = radius as isize;

    Zip::indexed(&mut output).par_for_each(|(y, x, c), out| {
        // Counting sort over the window keeps this O(window) per sample
        let mut counts = [0u16; 256];
        for dy in -r..=r {
            let sy = clamp_index(y as isize + dy, height);
            for dx in -r..=r {
                let sx = clamp_index(x as isize + dx, width);
                counts[input[[sy, sx, c]] as usize] += 1;
            }
        }
        let half = ((2 * radius + 1) * (2 * radius + 1) / 2) as u32;
        let mut seen = 0u32;
        for (value, &n) in counts.iter().enumerate() {
            seen += n as u32;
            if seen > half {
                *out = value as u8;
                break;
            }
        }
    });

    Image::from_array(output)
}

/// Bilateral filter over a circular window.
///
/// Weights combine spatial distance `exp(-d²/2σs²)` and intensity
/// difference `exp(-Δ²/2σc²)`, Δ being the Euclidean color distance.
pub(crate) fn bilateral(image: &Image, radius: usize, sigma_color: f32, sigma_space: f32) -> Image {
    let input = image.view();
    let (height, width, channels) = input.dim();
    let r = radius as isize;
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    let offsets: Vec<(isize, isize, f32)> = (-r..=r)
        .flat_map(|dy| (-r..=r).map(move |dx| (dy, dx)))
        .filter(|&(dy, dx)| dy * dy + dx * dx <= r * r)
        .map(|(dy, dx)| (dy, dx, ((dy * dy + dx * dx) as f32 * space_coeff).exp()))
        .collect();

    let mut output = Array3::<u8>::zeros((height, width, channels));
    Zip::indexed(&mut output).par_for_each(|(y, x, c), out| {
        let mut sum = 0.0f32;
        let mut weight_sum = 0.0f32;

        for &(dy, dx, spatial_weight) in &offsets {
            let sy = clamp_index(y as isize + dy, height);
            let sx = clamp_index(x as isize + dx, width);

            let color_dist_sq: f32 = (0..channels)
                .map(|k| {
                    let d = input[[y, x, k]] as f32 - input[[sy, sx, k]] as f32;
                    d * d
                })
                .sum();
            let weight = spatial_weight * (color_dist_sq * color_coeff).exp();

            sum += input[[sy, sx, c]] as f32 * weight;
            weight_sum += weight;
        }

        *out = if weight_sum > 0.0 {
            clamp_u8(sum / weight_sum)
        } else {
            input[[y, x, c]]
        };
    });

    Image::from_array(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8, channels: usize) -> Image {
        Image::filled(8, 8, channels, value).unwrap()
    }

    #[test]
    fn test_add_noise_deterministic() {
        let img = flat(128, 3);
        let params = NoiseParams {
            kind: NoiseKind::Gaussian,
            intensity: 0.1,
            seed: 12345,
        };
        let a = add_noise(&img, &params).unwrap();
        let b = add_noise(&img, &params).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, img);
    }

    #[test]
    fn test_rng_never_reaches_fixed_point() {
        for seed in [0, 2147483645, 2147483646, 2147483647, 4294967293, u64::MAX] {
            let mut rng = SimpleRng::new(seed);
            for _ in 0..1000 {
                let v = rng.next_f32();
                assert!((0.0..=1.0).contains(&v), "seed {seed} gave {v}");
            }
        }
    }

    #[test]
    fn test_add_noise_is_noisy_for_large_seeds() {
        let img = flat(128, 1);
        for seed in [2147483646, 4294967293] {
            let params = NoiseParams {
                kind: NoiseKind::Gaussian,
                intensity: 0.1,
                seed,
            };
            let result = add_noise(&img, &params).unwrap();
            let first = result.as_array()[[0, 0, 0]];
            assert!(
                result.as_array().iter().any(|&v| v != first),
                "seed {seed} produced a constant image"
            );
            assert!(result.as_array().iter().any(|&v| v != 0), "seed {seed} produced black");
        }
    }

    #[test]
    fn test_salt_pepper_only_extremes_change() {
        let img = flat(128, 1);
        let params = NoiseParams {
            kind: NoiseKind::SaltPepper,
            intensity: 0.3,
            seed: 7,
        };
        let result = add_noise(&img, &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 0 || v == 128 || v == 255));
        let changed = result.as_array().iter().filter(|&&v| v != 128).count();
        assert!(changed > 0 && changed < 64);
    }

    #[test]
    fn test_speckle_keeps_black_black() {
        let img = flat(0, 1);
        let params = NoiseParams {
            kind: NoiseKind::Speckle,
            intensity: 0.5,
            seed: 1,
        };
        let result = add_noise(&img, &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_noise_rejects_zero_intensity() {
        let params = NoiseParams {
            intensity: 0.0,
            ..NoiseParams::default()
        };
        assert!(add_noise(&flat(1, 1), &params).is_err());
    }

    #[test]
    fn test_median_removes_salt() {
        let img = Image::from_fn(5, 5, 1, |y, x, _| if y == 2 && x == 2 { 255 } else { 128 }).unwrap();
        let result = reduce_noise(&img, &DenoiseParams::Median { kernel_size: 3 }).unwrap();
        assert_eq!(result.get(2, 2, 0), 128);
    }

    #[test]
    fn test_median_preserves_edge() {
        let img = Image::from_fn(6, 6, 3, |_, x, _| if x < 3 { 0 } else { 255 }).unwrap();
        let result = reduce_noise(&img, &DenoiseParams::Median { kernel_size: 3 }).unwrap();
        assert_eq!(result, img);
    }

    #[test]
    fn test_bilateral_smooths_flat_but_keeps_edge() {
        let img = Image::from_fn(9, 9, 1, |y, x, _| {
            let base = if x < 4 { 40 } else { 220 };
            if y == 4 && x == 1 {
                base + 6
            } else {
                base
            }
        })
        .unwrap();
        let params = DenoiseParams::Bilateral {
            diameter: 5,
            sigma_color: 20.0,
            sigma_space: 2.0,
        };
        let result = reduce_noise(&img, &params).unwrap();
        assert!((result.get(1, 4, 0) as i32 - 40).abs() < 6);
        assert!(result.get(3, 4, 0) < 50);
        assert!(result.get(4, 4, 0) > 210);
    }

    #[test]
    fn test_gaussian_denoise_shape() {
        let img = Image::from_fn(5, 7, 3, |y, x, c| (x * y * c) as u8).unwrap();
        let params = DenoiseParams::Gaussian {
            kernel_size: 3,
            sigma: 1.0,
        };
        let result = reduce_noise(&img, &params).unwrap();
        assert_eq!(result.as_array().dim(), img.as_array().dim());
    }
}
