//! Core utilities shared by the filter families.
//!
//! This module provides:
//! - Gaussian and derivative kernel generation
//! - Convolution with boundary replication (edge pixels repeat)
//! - Plane splitting / merging with rounding and clamping
//! - Histograms

use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};

use crate::buffer::Image;
use crate::error::{ensure_odd_kernel, FilterError, Result};

/// Largest kernel side accepted by convolution-based operators.
pub const MAX_KERNEL_SIZE: usize = 99;

/// Horizontal Sobel derivative.
pub const SOBEL_X: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
/// Vertical Sobel derivative.
pub const SOBEL_Y: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

// ============================================================================
// Kernels
// ============================================================================

/// Sigma used when the caller passes `sigma <= 0` for a given kernel size.
pub fn default_sigma(size: usize) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Generate a normalized 1D Gaussian kernel.
///
/// # Arguments
/// * `size` - Odd number of taps; bounds the support
/// * `sigma` - Standard deviation; `<= 0` derives it from `size`
///
/// # Returns
/// Weights summing to 1
pub fn gaussian_kernel_1d(size: usize, sigma: f32) -> Vec<f32> {
    let size = size.max(1) | 1;
    let sigma = if sigma > 0.0 { sigma } else { default_sigma(size) };
    let half = (size / 2) as f64;
    let sigma = sigma as f64;

    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - half;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();

    let sum: f64 = raw.iter().sum();
    raw.iter().map(|v| (v / sum) as f32).collect()
}

/// Square convolution kernel with odd side length.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Array2<f32>,
}

impl Kernel {
    /// Wrap a weight matrix; it must be square with odd side ≥ 3.
    pub fn from_weights(weights: Array2<f32>) -> Result<Kernel> {
        let (rows, cols) = weights.dim();
        if rows != cols {
            return Err(FilterError::invalid(format!(
                "kernel must be square, got {rows}x{cols}"
            )));
        }
        ensure_odd_kernel("kernel size", rows, MAX_KERNEL_SIZE)?;
        Ok(Kernel { weights })
    }

    /// 2D Gaussian kernel, the outer product of [`gaussian_kernel_1d`] with itself.
    pub fn gaussian(size: usize, sigma: f32) -> Result<Kernel> {
        ensure_odd_kernel("kernel size", size, MAX_KERNEL_SIZE)?;
        let k1d = gaussian_kernel_1d(size, sigma);
        let weights = Array2::from_shape_fn((size, size), |(y, x)| k1d[y] * k1d[x]);
        Ok(Kernel { weights })
    }

    pub fn sobel_x() -> Kernel {
        Kernel {
            weights: Array2::from_shape_fn((3, 3), |(y, x)| SOBEL_X[y][x]),
        }
    }

    pub fn sobel_y() -> Kernel {
        Kernel {
            weights: Array2::from_shape_fn((3, 3), |(y, x)| SOBEL_Y[y][x]),
        }
    }

    pub fn size(&self) -> usize {
        self.weights.dim().0
    }

    pub fn radius(&self) -> usize {
        self.size() / 2
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().map(|&w| w as f64).sum()
    }
}

// ============================================================================
// Convolution (replicated boundary)
// ============================================================================

/// Clamp a possibly out-of-range coordinate onto `[0, len)`.
#[inline]
pub fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Round and clamp a float sample into `u8`.
#[inline]
pub fn clamp_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, 255.0) as u8
}

/// Two-pass separable convolution: horizontal with `kx`, then vertical with `ky`.
pub fn convolve_separable(plane: ArrayView2<f32>, kx: &[f32], ky: &[f32]) -> Array2<f32> {
    let (height, width) = plane.dim();
    let hx = (kx.len() / 2) as isize;
    let hy = (ky.len() / 2) as isize;

    // Horizontal pass
    let mut temp = Array2::<f32>::zeros((height, width));
    Zip::indexed(&mut temp).par_for_each(|(y, x), out| {
        let mut sum = 0.0f32;
        for (ki, &kv) in kx.iter().enumerate() {
            let sx = clamp_index(x as isize + ki as isize - hx, width);
            sum += plane[[y, sx]] * kv;
        }
        *out = sum;
    });

    // Vertical pass
    let mut result = Array2::<f32>::zeros((height, width));
    Zip::indexed(&mut result).par_for_each(|(y, x), out| {
        let mut sum = 0.0f32;
        for (ki, &kv) in ky.iter().enumerate() {
            let sy = clamp_index(y as isize + ki as isize - hy, height);
            sum += temp[[sy, x]] * kv;
        }
        *out = sum;
    });

    result
}

/// Direct 2D convolution (correlation orientation, as the Sobel tables are written).
pub fn convolve(plane: ArrayView2<f32>, kernel: &Kernel) -> Array2<f32> {
    let (height, width) = plane.dim();
    let r = kernel.radius() as isize;
    let weights = kernel.weights();

    let mut result = Array2::<f32>::zeros((height, width));
    Zip::indexed(&mut result).par_for_each(|(y, x), out| {
        let mut sum = 0.0f32;
        for ky in -r..=r {
            let sy = clamp_index(y as isize + ky, height);
            for kx in -r..=r {
                let sx = clamp_index(x as isize + kx, width);
                sum += plane[[sy, sx]] * weights[[(ky + r) as usize, (kx + r) as usize]];
            }
        }
        *out = sum;
    });

    result
}

// ============================================================================
// Plane helpers
// ============================================================================

/// Split an image into per-channel float planes.
pub fn to_planes(image: &Image) -> Vec<Array2<f32>> {
    (0..image.channels())
        .map(|c| image.channel(c).mapv(|v| v as f32))
        .collect()
}

/// Merge float planes back into an image, rounding and clamping each sample.
pub fn from_planes(planes: &[Array2<f32>]) -> Image {
    let (height, width) = planes[0].dim();
    let data = Array3::from_shape_fn((height, width, planes.len()), |(y, x, c)| {
        clamp_u8(planes[c][[y, x]])
    });
    Image::from_array(data)
}

/// Apply `f` to each channel independently.
pub fn map_channels<F>(image: &Image, f: F) -> Image
where
    F: Fn(ArrayView2<u8>) -> Array2<u8>,
{
    let planes: Vec<Array2<u8>> = (0..image.channels()).map(|c| f(image.channel(c))).collect();
    stack_planes(&planes)
}

/// Stack equally-sized `u8` planes into an image.
pub fn stack_planes(planes: &[Array2<u8>]) -> Image {
    let (height, width) = planes[0].dim();
    Image::from_array(Array3::from_shape_fn(
        (height, width, planes.len()),
        |(y, x, c)| planes[c][[y, x]],
    ))
}

/// Replicate a single plane into `channels` identical channels.
pub fn replicate_plane(plane: &Array2<u8>, channels: usize) -> Image {
    if channels == 1 {
        return Image::from_array(plane.clone().insert_axis(Axis(2)));
    }
    Image::from_array(Array3::from_shape_fn(
        (plane.dim().0, plane.dim().1, channels),
        |(y, x, _)| plane[[y, x]],
    ))
}

/// 256-bin histogram of a plane.
pub fn histogram(plane: ArrayView2<u8>) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for &v in plane.iter() {
        hist[v as usize] += 1;
    }
    hist
}
