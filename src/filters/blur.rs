//! Gaussian blur.
//!
//! Separable two-pass convolution with boundary replication. Each channel
//! is blurred independently.

use serde::{Deserialize, Serialize};

use super::core::{convolve_separable, from_planes, gaussian_kernel_1d, to_planes, MAX_KERNEL_SIZE};
use crate::buffer::Image;
use crate::error::{ensure_odd_kernel, FilterError, Result};

/// Parameters for [`gaussian_blur`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianBlurParams {
    /// Odd kernel side in [3, 99].
    pub kernel_size: usize,
    /// Standard deviation; `<= 0` derives it from the kernel size.
    pub sigma: f32,
}

impl Default for GaussianBlurParams {
    fn default() -> Self {
        Self {
            kernel_size: 5,
            sigma: 1.0,
        }
    }
}

impl GaussianBlurParams {
    pub fn validate(&self) -> Result<()> {
        ensure_odd_kernel("kernel_size", self.kernel_size, MAX_KERNEL_SIZE)?;
        if !self.sigma.is_finite() {
            return Err(FilterError::invalid("sigma must be finite"));
        }
        Ok(())
    }
}

/// Apply Gaussian blur.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Kernel size and sigma
///
/// # Returns
/// Blurred image with the same dimensions and channel count
pub fn gaussian_blur(image: &Image, params: &GaussianBlurParams) -> Result<Image> {
    params.validate()?;
    Ok(gaussian_blur_unchecked(image, params.kernel_size, params.sigma))
}

/// Blur without parameter validation, for internal pre-smoothing steps.
pub(crate) fn gaussian_blur_unchecked(image: &Image, kernel_size: usize, sigma: f32) -> Image {
    let kernel = gaussian_kernel_1d(kernel_size, sigma);
    let planes: Vec<_> = to_planes(image)
        .iter()
        .map(|p| convolve_separable(p.view(), &kernel, &kernel))
        .collect();
    from_planes(&planes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_white_pixel() -> Image {
        Image::from_fn(5, 5, 1, |y, x, _| if y == 2 && x == 2 { 255 } else { 0 }).unwrap()
    }

    #[test]
    fn test_single_pixel_bump() {
        let params = GaussianBlurParams {
            kernel_size: 3,
            sigma: 1.0,
        };
        let result = gaussian_blur(&single_white_pixel(), &params).unwrap();

        // w0 = 1 / (1 + 2e^-0.5) ~ 0.4519, centre = 255 * w0^2 ~ 52
        let center = result.get(2, 2, 0);
        assert!(center < 255);
        assert!((center as i32 - 52).abs() <= 1, "center was {center}");

        for &(x, y) in &[(0, 0), (4, 0), (0, 4), (4, 4)] {
            assert_eq!(result.get(x, y, 0), 0);
        }
        // Direct neighbours receive weight w0 * w1
        assert!(result.get(2, 1, 0) > 0);
        assert_eq!(result.get(2, 1, 0), result.get(1, 2, 0));
    }

    #[test]
    fn test_preserves_shape() {
        let img = Image::from_fn(7, 4, 3, |y, x, c| (x * 30 + y * 5 + c) as u8).unwrap();
        let result = gaussian_blur(&img, &GaussianBlurParams::default()).unwrap();
        assert_eq!(result.width(), 7);
        assert_eq!(result.height(), 4);
        assert_eq!(result.channels(), 3);
    }

    #[test]
    fn test_no_dark_border() {
        let img = Image::filled(6, 6, 1, 200).unwrap();
        let params = GaussianBlurParams {
            kernel_size: 9,
            sigma: 3.0,
        };
        let result = gaussian_blur(&img, &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 200));
    }

    #[test]
    fn test_rejects_even_kernel() {
        let img = single_white_pixel();
        let params = GaussianBlurParams {
            kernel_size: 4,
            sigma: 1.0,
        };
        assert!(matches!(
            gaussian_blur(&img, &params),
            Err(FilterError::InvalidParameter(_))
        ));
    }
}
