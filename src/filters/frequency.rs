//! Frequency-domain filters: lowpass, highpass, bandpass.
//!
//! Each channel is transformed with a 2D DFT, multiplied by a radially
//! symmetric [`FrequencyMask`] and transformed back. The output sample is
//! the magnitude of the inverse transform, rounded and clamped.
//!
//! The FFT is a radix-2 Cooley-Tukey transform; other lengths go through
//! Bluestein's chirp-z algorithm on a padded radix-2 buffer.

use std::f64::consts::PI;

use log::debug;
use ndarray::Array2;
use num::complex::Complex;
use num::Zero;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::core::{from_planes, to_planes};
use crate::buffer::Image;
use crate::error::{ensure_positive, ensure_range, Result};

type C64 = Complex<f64>;

// ============================================================================
// FFT
// ============================================================================

/// In-place 1D DFT of any length. The inverse is unnormalized.
pub fn fft(buf: &mut [C64], inverse: bool) {
    let n = buf.len();
    if n <= 1 {
        return;
    }
    if n.is_power_of_two() {
        radix2(buf, inverse);
    } else {
        bluestein(buf, inverse);
    }
}

fn radix2(buf: &mut [C64], inverse: bool) {
    let n = buf.len();

    // Bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f64;
        let w_len = C64::new(angle.cos(), angle.sin());
        for start in (0..n).step_by(len) {
            let mut w = C64::new(1.0, 0.0);
            for k in 0..len / 2 {
                let u = buf[start + k];
                let v = buf[start + k + len / 2] * w;
                buf[start + k] = u + v;
                buf[start + k + len / 2] = u - v;
                w *= w_len;
            }
        }
        len <<= 1;
    }
}

fn bluestein(buf: &mut [C64], inverse: bool) {
    let n = buf.len();
    let m = (2 * n - 1).next_power_of_two();
    let sign = if inverse { 1.0 } else { -1.0 };

    // Chirp w_k = exp(sign * i*pi*k^2/n); k^2 reduced mod 2n to keep precision
    let chirp: Vec<C64> = (0..n)
        .map(|k| {
            let k2 = (k as u128 * k as u128 % (2 * n as u128)) as f64;
            let angle = sign * PI * k2 / n as f64;
            C64::new(angle.cos(), angle.sin())
        })
        .collect();

    let mut a = vec![C64::zero(); m];
    for k in 0..n {
        a[k] = buf[k] * chirp[k];
    }
    let mut b = vec![C64::zero(); m];
    b[0] = chirp[0].conj();
    for k in 1..n {
        b[k] = chirp[k].conj();
        b[m - k] = chirp[k].conj();
    }

    radix2(&mut a, false);
    radix2(&mut b, false);
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x *= *y;
    }
    radix2(&mut a, true);

    let scale = 1.0 / m as f64;
    for k in 0..n {
        buf[k] = a[k] * scale * chirp[k];
    }
}

/// Row-major 2D spectrum of a `width x height` plane.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub width: usize,
    pub height: usize,
    pub data: Vec<C64>,
}

/// Forward 2D DFT of a real plane.
pub fn fft2d(plane: &Array2<f32>) -> Spectrum {
    let (height, width) = plane.dim();
    let data: Vec<C64> = plane.iter().map(|&v| C64::new(v as f64, 0.0)).collect();
    let mut spectrum = Spectrum { width, height, data };
    transform_2d(&mut spectrum, false);
    spectrum
}

/// Inverse 2D DFT, normalized by `1 / (width * height)`.
pub fn ifft2d(mut spectrum: Spectrum) -> Array2<C64> {
    transform_2d(&mut spectrum, true);
    let scale = 1.0 / (spectrum.width * spectrum.height) as f64;
    Array2::from_shape_fn((spectrum.height, spectrum.width), |(y, x)| {
        spectrum.data[y * spectrum.width + x] * scale
    })
}

fn transform_2d(spectrum: &mut Spectrum, inverse: bool) {
    let (width, height) = (spectrum.width, spectrum.height);

    spectrum
        .data
        .par_chunks_mut(width)
        .for_each(|row| fft(row, inverse));

    let mut columns = vec![C64::zero(); width * height];
    for y in 0..height {
        for x in 0..width {
            columns[x * height + y] = spectrum.data[y * width + x];
        }
    }
    columns
        .par_chunks_mut(height)
        .for_each(|col| fft(col, inverse));
    for x in 0..width {
        for y in 0..height {
            spectrum.data[y * width + x] = columns[x * height + y];
        }
    }
}

// ============================================================================
// Masks
// ============================================================================

/// Which band the mask passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyFilter {
    #[default]
    Lowpass,
    Highpass,
    /// Passes normalized radii in `[0.5 * cutoff, cutoff]`.
    Bandpass,
}

/// Shape of the transition at the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaskProfile {
    /// Hard 0/1 edge.
    #[default]
    Ideal,
    /// `1 / (1 + (rho / cutoff)^(2 * order))`.
    Butterworth { order: u32 },
}

/// Real-valued attenuation map in unshifted DFT layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyMask {
    values: Array2<f32>,
}

impl FrequencyMask {
    pub fn new(
        width: usize,
        height: usize,
        filter: FrequencyFilter,
        cutoff: f32,
        profile: MaskProfile,
    ) -> FrequencyMask {
        let values = Array2::from_shape_fn((height, width), |(y, x)| {
            let fx = signed_frequency(x, width);
            let fy = signed_frequency(y, height);
            let rho = (fx * fx + fy * fy).sqrt();
            match filter {
                FrequencyFilter::Lowpass => lowpass(rho, cutoff, profile),
                FrequencyFilter::Highpass => 1.0 - lowpass(rho, cutoff, profile),
                FrequencyFilter::Bandpass => {
                    lowpass(rho, cutoff, profile) * (1.0 - lowpass_outer(rho, 0.5 * cutoff, profile))
                }
            }
        });
        FrequencyMask { values }
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Mask value at the DFT bin `(x, y)`.
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.values[[y, x]]
    }
}

/// Signed frequency index of `k` normalized by half the length.
fn signed_frequency(k: usize, len: usize) -> f32 {
    let half = (len / 2).max(1) as f32;
    let signed = if k <= len / 2 { k as f32 } else { k as f32 - len as f32 };
    signed / half
}

/// Lowpass response including the cutoff radius.
fn lowpass(rho: f32, cutoff: f32, profile: MaskProfile) -> f32 {
    match profile {
        MaskProfile::Ideal => {
            if rho <= cutoff {
                1.0
            } else {
                0.0
            }
        }
        MaskProfile::Butterworth { order } => butterworth(rho, cutoff, order),
    }
}

/// Lowpass response excluding the cutoff radius, so a band keeps its inner edge.
fn lowpass_outer(rho: f32, cutoff: f32, profile: MaskProfile) -> f32 {
    match profile {
        MaskProfile::Ideal => {
            if rho < cutoff {
                1.0
            } else {
                0.0
            }
        }
        MaskProfile::Butterworth { order } => butterworth(rho, cutoff, order),
    }
}

fn butterworth(rho: f32, cutoff: f32, order: u32) -> f32 {
    1.0 / (1.0 + (rho / cutoff).powi(2 * order as i32))
}

// ============================================================================
// Filtering
// ============================================================================

/// Parameters for [`frequency_filter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyParams {
    pub filter: FrequencyFilter,
    /// Normalized radius in (0, 1].
    pub cutoff: f32,
    pub profile: MaskProfile,
}

impl Default for FrequencyParams {
    fn default() -> Self {
        Self {
            filter: FrequencyFilter::Lowpass,
            cutoff: 0.3,
            profile: MaskProfile::Ideal,
        }
    }
}

impl FrequencyParams {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("cutoff", self.cutoff, 1.0)?;
        if let MaskProfile::Butterworth { order } = self.profile {
            ensure_range("order", order, 1, 10)?;
        }
        Ok(())
    }
}

/// Filter an image in the frequency domain.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Band, cutoff and mask profile
///
/// # Returns
/// Magnitude of the filtered image, same shape as the input
pub fn frequency_filter(image: &Image, params: &FrequencyParams) -> Result<Image> {
    params.validate()?;
    let (width, height) = (image.width(), image.height());
    let mask = FrequencyMask::new(width, height, params.filter, params.cutoff, params.profile);
    debug!(
        "frequency filter {:?} cutoff {} on {width}x{height}",
        params.filter, params.cutoff
    );

    let planes: Vec<Array2<f32>> = to_planes(image)
        .iter()
        .map(|plane| {
            let mut spectrum = fft2d(plane);
            for (coeff, &m) in spectrum.data.iter_mut().zip(mask.values().iter()) {
                *coeff *= m as f64;
            }
            ifft2d(spectrum).mapv(|c| c.norm() as f32)
        })
        .collect();

    Ok(from_planes(&planes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dft(input: &[C64]) -> Vec<C64> {
        let n = input.len();
        (0..n)
            .map(|k| {
                input
                    .iter()
                    .enumerate()
                    .map(|(t, &x)| {
                        let angle = -2.0 * PI * (k * t) as f64 / n as f64;
                        x * C64::new(angle.cos(), angle.sin())
                    })
                    .sum()
            })
            .collect()
    }

    fn assert_close(a: &[C64], b: &[C64]) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-6, "{x} vs {y}");
        }
    }

    #[test]
    fn test_fft_matches_naive_dft() {
        for &n in &[1usize, 2, 8, 6, 15] {
            let input: Vec<C64> = (0..n).map(|i| C64::new((i * i % 7) as f64, i as f64 * 0.5)).collect();
            let mut buf = input.clone();
            fft(&mut buf, false);
            assert_close(&buf, &naive_dft(&input));
        }
    }

    #[test]
    fn test_fft2d_roundtrip() {
        let plane = Array2::from_shape_fn((5, 6), |(y, x)| ((x * 31 + y * 17) % 256) as f32);
        let back = ifft2d(fft2d(&plane));
        for (a, b) in plane.iter().zip(back.iter()) {
            assert!((*a as f64 - b.re).abs() < 1e-6);
            assert!(b.im.abs() < 1e-6);
        }
    }

    #[test]
    fn test_mask_dc_and_butterworth_half_power() {
        let lp = FrequencyMask::new(16, 16, FrequencyFilter::Lowpass, 0.5, MaskProfile::Ideal);
        assert_eq!(lp.at(0, 0), 1.0);
        assert_eq!(lp.at(8, 8), 0.0);

        let hp = FrequencyMask::new(16, 16, FrequencyFilter::Highpass, 0.5, MaskProfile::Ideal);
        assert_eq!(hp.at(0, 0), 0.0);
        assert_eq!(hp.at(8, 8), 1.0);

        // x = 4 on a 16-wide grid is rho = 0.5
        let bw = FrequencyMask::new(16, 16, FrequencyFilter::Lowpass, 0.5, MaskProfile::Butterworth { order: 2 });
        assert!((bw.at(4, 0) - 0.5).abs() < 1e-6);
        // Negative frequencies mirror positive ones
        assert_eq!(bw.at(12, 0), bw.at(4, 0));
    }

    #[test]
    fn test_bandpass_band_edges() {
        let bp = FrequencyMask::new(16, 16, FrequencyFilter::Bandpass, 0.5, MaskProfile::Ideal);
        assert_eq!(bp.at(0, 0), 0.0);
        assert_eq!(bp.at(2, 0), 1.0); // rho = 0.25
        assert_eq!(bp.at(4, 0), 1.0); // rho = 0.5
        assert_eq!(bp.at(6, 0), 0.0);
    }

    #[test]
    fn test_lowpass_flattens_checkerboard() {
        let img = Image::from_fn(8, 8, 1, |y, x, _| if (x + y) % 2 == 0 { 0 } else { 255 }).unwrap();
        let params = FrequencyParams {
            filter: FrequencyFilter::Lowpass,
            cutoff: 0.5,
            profile: MaskProfile::Ideal,
        };
        let result = frequency_filter(&img, &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 127 || v == 128));
    }

    #[test]
    fn test_constant_image_passes_lowpass_and_vanishes_in_highpass() {
        let img = Image::filled(6, 5, 3, 90).unwrap();
        let mut params = FrequencyParams::default();
        let low = frequency_filter(&img, &params).unwrap();
        assert_eq!(low, img);

        params.filter = FrequencyFilter::Highpass;
        let high = frequency_filter(&img, &params).unwrap();
        assert!(high.as_array().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_rejects_bad_cutoff() {
        let img = Image::filled(4, 4, 1, 0).unwrap();
        for cutoff in [0.0, -0.5, 1.5] {
            let params = FrequencyParams {
                cutoff,
                ..FrequencyParams::default()
            };
            assert!(frequency_filter(&img, &params).is_err());
        }
    }
}
