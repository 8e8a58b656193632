//! Discrete wavelet transform and its visualization.
//!
//! Periodic DWT with orthonormal Haar and Daubechies filters and the
//! biorthogonal CDF 5/3 (`bior2.2`) pair. The 2D transform uses the Mallat layout: after each level the approximation
//! occupies the top-left quarter of the previous region.

use ndarray::{s, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::core::clamp_u8;
use crate::buffer::Image;
use crate::error::{ensure_range, Result};

/// Wavelet family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaveletFamily {
    #[default]
    Haar,
    /// Daubechies, 2 vanishing moments.
    Db2,
    /// Daubechies, 4 vanishing moments.
    Db4,
    /// Biorthogonal spline 2.2 (CDF 5/3); symmetric, not orthonormal.
    #[serde(rename = "bior2.2", alias = "bior22")]
    Bior22,
}

impl WaveletFamily {
    pub fn is_orthonormal(self) -> bool {
        !matches!(self, WaveletFamily::Bior22)
    }

    /// Low-pass decomposition filter, normalized so its taps sum to √2.
    pub fn scaling_filter(self) -> Vec<f64> {
        match self {
            WaveletFamily::Bior22 => {
                let r = std::f64::consts::SQRT_2;
                vec![-r / 8.0, r / 4.0, 3.0 * r / 4.0, r / 4.0, -r / 8.0, 0.0]
            }
            WaveletFamily::Haar => {
                let v = std::f64::consts::FRAC_1_SQRT_2;
                vec![v, v]
            }
            WaveletFamily::Db2 => {
                let s3 = 3.0_f64.sqrt();
                let d = 4.0 * 2.0_f64.sqrt();
                vec![(1.0 + s3) / d, (3.0 + s3) / d, (3.0 - s3) / d, (1.0 - s3) / d]
            }
            WaveletFamily::Db4 => vec![
                0.23037781330885523,
                0.7148465705525415,
                0.6308807679295904,
                -0.02798376941698385,
                -0.18703481171888114,
                0.030841381835986965,
                0.032883011666982945,
                -0.010597401784997278,
            ],
        }
    }
}

/// Analysis and synthesis filter banks of a wavelet.
///
/// Filters are applied by correlation at even offsets: `forward` takes
/// `sum(dec[i] * x[2k + i])` and `inverse` scatters `rec[i] * c[k]` back to
/// `2k + i`.
#[derive(Debug, Clone)]
pub struct Wavelet {
    pub family: WaveletFamily,
    /// Low-pass decomposition filter.
    pub dec_lo: Vec<f64>,
    /// High-pass decomposition filter.
    pub dec_hi: Vec<f64>,
    /// Low-pass reconstruction filter.
    pub rec_lo: Vec<f64>,
    /// High-pass reconstruction filter.
    pub rec_hi: Vec<f64>,
}

impl Wavelet {
    pub fn new(family: WaveletFamily) -> Self {
        let dec_lo = family.scaling_filter();
        if family == WaveletFamily::Bior22 {
            let r = std::f64::consts::SQRT_2;
            return Wavelet {
                family,
                dec_lo,
                dec_hi: vec![0.0, 0.0, r / 4.0, -r / 2.0, r / 4.0, 0.0],
                rec_lo: vec![0.0, r / 4.0, r / 2.0, r / 4.0, 0.0, 0.0],
                rec_hi: vec![0.0, r / 8.0, r / 4.0, -3.0 * r / 4.0, r / 4.0, r / 8.0],
            };
        }

        // Quadrature mirror; orthonormal banks reconstruct with the same taps.
        let len = dec_lo.len();
        let dec_hi: Vec<f64> = (0..len)
            .map(|n| {
                let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
                sign * dec_lo[len - 1 - n]
            })
            .collect();
        Wavelet {
            family,
            rec_lo: dec_lo.clone(),
            rec_hi: dec_hi.clone(),
            dec_lo,
            dec_hi,
        }
    }

    /// One level of the periodic 1D transform of an even-length signal.
    ///
    /// # Returns
    /// `(approximation, detail)`, each half the input length
    pub fn forward(&self, signal: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = signal.len();
        let half = n / 2;
        let mut approx = vec![0.0; half];
        let mut detail = vec![0.0; half];
        for k in 0..half {
            for (i, (&lo, &hi)) in self.dec_lo.iter().zip(self.dec_hi.iter()).enumerate() {
                let v = signal[(2 * k + i) % n];
                approx[k] += lo * v;
                detail[k] += hi * v;
            }
        }
        (approx, detail)
    }

    /// Inverse of [`Wavelet::forward`].
    pub fn inverse(&self, approx: &[f64], detail: &[f64]) -> Vec<f64> {
        let n = approx.len() * 2;
        let mut signal = vec![0.0; n];
        for k in 0..approx.len() {
            for (i, (&lo, &hi)) in self.rec_lo.iter().zip(self.rec_hi.iter()).enumerate() {
                signal[(2 * k + i) % n] += lo * approx[k] + hi * detail[k];
            }
        }
        signal
    }
}

// ============================================================================
// 2D Transform
// ============================================================================

/// Edge-replicate a plane so both sides are multiples of `multiple`.
pub fn pad_to_multiple(plane: &Array2<f64>, multiple: usize) -> Array2<f64> {
    let (height, width) = plane.dim();
    let ph = height.div_ceil(multiple) * multiple;
    let pw = width.div_ceil(multiple) * multiple;
    if ph == height && pw == width {
        return plane.clone();
    }
    Array2::from_shape_fn((ph, pw), |(y, x)| plane[[y.min(height - 1), x.min(width - 1)]])
}

/// Multi-level 2D decomposition in place.
///
/// Both sides of `plane` must be divisible by `2^levels`.
pub fn decompose_2d(plane: &mut Array2<f64>, wavelet: &Wavelet, levels: usize) {
    let (mut h, mut w) = plane.dim();
    for _ in 0..levels {
        let mut region = plane.slice_mut(s![..h, ..w]);
        for mut row in region.axis_iter_mut(Axis(0)) {
            let (a, d) = wavelet.forward(&row.to_vec());
            for (dst, src) in row.iter_mut().zip(a.iter().chain(d.iter())) {
                *dst = *src;
            }
        }
        for mut col in region.axis_iter_mut(Axis(1)) {
            let (a, d) = wavelet.forward(&col.to_vec());
            for (dst, src) in col.iter_mut().zip(a.iter().chain(d.iter())) {
                *dst = *src;
            }
        }
        h /= 2;
        w /= 2;
    }
}

/// Inverse of [`decompose_2d`].
pub fn reconstruct_2d(coeffs: &mut Array2<f64>, wavelet: &Wavelet, levels: usize) {
    let (height, width) = coeffs.dim();
    for level in (0..levels).rev() {
        let h = height >> level;
        let w = width >> level;
        let mut region = coeffs.slice_mut(s![..h, ..w]);
        for mut col in region.axis_iter_mut(Axis(1)) {
            let v = col.to_vec();
            let out = wavelet.inverse(&v[..h / 2], &v[h / 2..]);
            for (dst, src) in col.iter_mut().zip(out.iter()) {
                *dst = *src;
            }
        }
        for mut row in region.axis_iter_mut(Axis(0)) {
            let v = row.to_vec();
            let out = wavelet.inverse(&v[..w / 2], &v[w / 2..]);
            for (dst, src) in row.iter_mut().zip(out.iter()) {
                *dst = *src;
            }
        }
    }
}

// ============================================================================
// Visualization
// ============================================================================

/// Parameters for [`wavelet_transform`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveletParams {
    pub family: WaveletFamily,
    /// Decomposition depth in [1, 4].
    pub levels: usize,
}

impl Default for WaveletParams {
    fn default() -> Self {
        Self {
            family: WaveletFamily::Haar,
            levels: 2,
        }
    }
}

impl WaveletParams {
    pub fn validate(&self) -> Result<()> {
        ensure_range("levels", self.levels, 1, 4)
    }
}

/// Render the multi-level decomposition of every channel as a mosaic.
///
/// The approximation band is min-max stretched to [0, 255]; every detail
/// sub-band shows its coefficient magnitudes stretched by the band maximum.
///
/// # Returns
/// Image with the input's shape
pub fn wavelet_transform(image: &Image, params: &WaveletParams) -> Result<Image> {
    params.validate()?;
    let wavelet = Wavelet::new(params.family);
    let levels = params.levels;
    let (height, width) = (image.height(), image.width());

    let mut output = image.as_array().clone();
    for c in 0..image.channels() {
        let plane = image.channel(c).mapv(|v| v as f64);
        let mut coeffs = pad_to_multiple(&plane, 1 << levels);
        decompose_2d(&mut coeffs, &wavelet, levels);
        let mosaic = render_mosaic(&coeffs, levels);
        output
            .index_axis_mut(Axis(2), c)
            .assign(&mosaic.slice(s![..height, ..width]));
    }

    Ok(Image::from_array(output))
}

fn render_mosaic(coeffs: &Array2<f64>, levels: usize) -> Array2<u8> {
    let (height, width) = coeffs.dim();
    let mut out = Array2::<u8>::zeros((height, width));

    let ah = height >> levels;
    let aw = width >> levels;
    let approx = coeffs.slice(s![..ah, ..aw]);
    let lo = approx.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = approx.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = (hi - lo).max(1e-12);
    Zip::from(out.slice_mut(s![..ah, ..aw]))
        .and(&approx)
        .for_each(|o, &v| *o = clamp_u8(((v - lo) / range * 255.0) as f32));

    for level in 0..levels {
        let h = height >> (level + 1);
        let w = width >> (level + 1);
        let bands = [
            (0..h, w..2 * w),
            (h..2 * h, 0..w),
            (h..2 * h, w..2 * w),
        ];
        for (rows, cols) in bands {
            let band = coeffs.slice(s![rows.clone(), cols.clone()]);
            let max = band.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
            let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
            Zip::from(out.slice_mut(s![rows, cols]))
                .and(&band)
                .for_each(|o, &v| *o = clamp_u8((v.abs() * scale) as f32));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WaveletFamily; 4] = [
        WaveletFamily::Haar,
        WaveletFamily::Db2,
        WaveletFamily::Db4,
        WaveletFamily::Bior22,
    ];

    #[test]
    fn test_filters_are_orthonormal() {
        for family in [WaveletFamily::Haar, WaveletFamily::Db2, WaveletFamily::Db4] {
            assert!(family.is_orthonormal());
            let w = Wavelet::new(family);
            let sum: f64 = w.dec_lo.iter().sum();
            let energy: f64 = w.dec_lo.iter().map(|v| v * v).sum();
            assert!((sum - 2.0_f64.sqrt()).abs() < 1e-9, "{family:?}");
            assert!((energy - 1.0).abs() < 1e-9, "{family:?}");
            let hi_sum: f64 = w.dec_hi.iter().sum();
            assert!(hi_sum.abs() < 1e-9);
        }
    }

    #[test]
    fn test_1d_perfect_reconstruction() {
        let signal: Vec<f64> = (0..16).map(|i| ((i * 7) % 11) as f64).collect();
        for family in ALL {
            let w = Wavelet::new(family);
            let (a, d) = w.forward(&signal);
            let back = w.inverse(&a, &d);
            for (x, y) in signal.iter().zip(back.iter()) {
                assert!((x - y).abs() < 1e-9, "{family:?}");
            }
        }
    }

    #[test]
    fn test_2d_perfect_reconstruction() {
        let plane = Array2::from_shape_fn((16, 8), |(y, x)| ((y * 13 + x * 5) % 37) as f64);
        for family in [WaveletFamily::Db2, WaveletFamily::Bior22] {
            let w = Wavelet::new(family);
            let mut coeffs = plane.clone();
            decompose_2d(&mut coeffs, &w, 2);
            assert!(coeffs != plane);
            reconstruct_2d(&mut coeffs, &w, 2);
            for (x, y) in plane.iter().zip(coeffs.iter()) {
                assert!((x - y).abs() < 1e-9, "{family:?}");
            }
        }
    }

    #[test]
    fn test_bior22_is_symmetric_spline_pair() {
        let w = Wavelet::new(WaveletFamily::Bior22);
        assert!(!WaveletFamily::Bior22.is_orthonormal());
        // Analysis low-pass is the 5-tap spline, symmetric about its centre
        assert_eq!(w.dec_lo[0], w.dec_lo[4]);
        assert_eq!(w.dec_lo[1], w.dec_lo[3]);
        let sum: f64 = w.dec_lo.iter().sum();
        assert!((sum - 2.0_f64.sqrt()).abs() < 1e-12);
        // Both high-pass filters annihilate constants
        assert!(w.dec_hi.iter().sum::<f64>().abs() < 1e-12);
        assert!(w.rec_hi.iter().sum::<f64>().abs() < 1e-12);
        // Not orthonormal: the energy differs from 1
        let energy: f64 = w.dec_lo.iter().map(|v| v * v).sum();
        assert!((energy - 1.0).abs() > 0.1);

        let (_, detail) = w.forward(&[5.0; 16]);
        assert!(detail.iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn test_bior22_parses_by_its_usual_name() {
        let params: WaveletParams = serde_json::from_str(r#"{"family": "bior2.2", "levels": 2}"#).unwrap();
        assert_eq!(params.family, WaveletFamily::Bior22);
        let img = Image::from_fn(12, 9, 1, |y, x, _| (x * 19 + y * 7) as u8).unwrap();
        let result = wavelet_transform(&img, &params).unwrap();
        assert_eq!(result.as_array().dim(), img.as_array().dim());
    }

    #[test]
    fn test_haar_constant_has_no_detail() {
        let mut plane = Array2::from_elem((8, 8), 10.0);
        decompose_2d(&mut plane, &Wavelet::new(WaveletFamily::Haar), 1);
        // Approximation gains a factor of 2 per 2D level
        assert!((plane[[0, 0]] - 20.0).abs() < 1e-9);
        assert!(plane[[0, 4]].abs() < 1e-9);
        assert!(plane[[5, 5]].abs() < 1e-9);
    }

    #[test]
    fn test_pad_replicates_edges() {
        let plane = Array2::from_shape_fn((3, 5), |(y, x)| (y * 10 + x) as f64);
        let padded = pad_to_multiple(&plane, 4);
        assert_eq!(padded.dim(), (4, 8));
        assert_eq!(padded[[3, 7]], 24.0);
        assert_eq!(padded[[0, 6]], 4.0);
    }

    #[test]
    fn test_visualization_keeps_shape() {
        let img = Image::from_fn(13, 10, 3, |y, x, c| (x * 17 + y * 3 + c * 40) as u8).unwrap();
        let params = WaveletParams {
            family: WaveletFamily::Db4,
            levels: 3,
        };
        let result = wavelet_transform(&img, &params).unwrap();
        assert_eq!(result.as_array().dim(), img.as_array().dim());
    }

    #[test]
    fn test_visualization_rejects_deep_levels() {
        let img = Image::filled(8, 8, 1, 0).unwrap();
        let params = WaveletParams {
            family: WaveletFamily::Haar,
            levels: 5,
        };
        assert!(wavelet_transform(&img, &params).is_err());
    }
}
