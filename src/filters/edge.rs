//! Edge detection filters: Sobel, Canny.
//!
//! Both detectors work on the luminance of the input. The resulting edge
//! map is replicated into every channel so the output keeps the input's
//! channel count.

use std::collections::VecDeque;

use log::debug;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use super::core::{clamp_u8, convolve, gaussian_kernel_1d, convolve_separable, replicate_plane, Kernel, MAX_KERNEL_SIZE};
use crate::buffer::Image;
use crate::error::{ensure_odd_kernel, FilterError, Result};

/// Which edge detector to run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EdgeParams {
    /// Gradient magnitude of the 3x3 Sobel derivatives.
    Sobel,
    /// Multi-stage Canny detector.
    Canny {
        /// Weak-edge threshold on the gradient magnitude.
        low: f32,
        /// Strong-edge threshold on the gradient magnitude.
        high: f32,
        /// Odd Gaussian pre-smoothing kernel size.
        #[serde(default = "default_blur_size")]
        blur_size: usize,
    },
}

fn default_blur_size() -> usize {
    5
}

impl Default for EdgeParams {
    fn default() -> Self {
        EdgeParams::Sobel
    }
}

impl EdgeParams {
    pub fn validate(&self) -> Result<()> {
        if let EdgeParams::Canny { low, high, blur_size } = *self {
            ensure_odd_kernel("blur_size", blur_size, MAX_KERNEL_SIZE)?;
            if !low.is_finite() || !high.is_finite() || low < 0.0 || high < 0.0 {
                return Err(FilterError::invalid(format!(
                    "canny thresholds must be finite and non-negative, got low={low} high={high}"
                )));
            }
        }
        Ok(())
    }
}

/// Sobel gradients of a float plane.
pub(crate) struct Gradients {
    pub gx: Array2<f32>,
    pub gy: Array2<f32>,
    pub magnitude: Array2<f32>,
}

pub(crate) fn sobel_gradients(plane: &Array2<f32>) -> Gradients {
    let gx = convolve(plane.view(), &Kernel::sobel_x());
    let gy = convolve(plane.view(), &Kernel::sobel_y());
    let mut magnitude = Array2::<f32>::zeros(plane.dim());
    Zip::from(&mut magnitude)
        .and(&gx)
        .and(&gy)
        .par_for_each(|m, &x, &y| *m = (x * x + y * y).sqrt());
    Gradients { gx, gy, magnitude }
}

/// Run the selected edge detector.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Detector selection and thresholds
///
/// # Returns
/// Edge map with the input's dimensions and channel count
pub fn detect_edges(image: &Image, params: &EdgeParams) -> Result<Image> {
    params.validate()?;
    let luma = image.to_luma().mapv(|v| v as f32);

    let edges = match *params {
        EdgeParams::Sobel => sobel_gradients(&luma).magnitude.mapv(clamp_u8),
        EdgeParams::Canny { low, high, blur_size } => canny(&luma, low, high, blur_size),
    };

    Ok(replicate_plane(&edges, image.channels()))
}

// ============================================================================
// Canny
// ============================================================================

/// Quantized gradient direction used by non-maximum suppression.
#[derive(Clone, Copy)]
enum Direction {
    Horizontal,
    Diagonal45,
    Vertical,
    Diagonal135,
}

impl Direction {
    fn from_gradient(gx: f32, gy: f32) -> Direction {
        let mut angle = gy.atan2(gx).to_degrees();
        if angle < 0.0 {
            angle += 180.0;
        }
        if !(22.5..157.5).contains(&angle) {
            Direction::Horizontal
        } else if angle < 67.5 {
            Direction::Diagonal45
        } else if angle < 112.5 {
            Direction::Vertical
        } else {
            Direction::Diagonal135
        }
    }

    /// Offsets (dy, dx) of the two neighbours along the gradient.
    fn neighbours(self) -> [(isize, isize); 2] {
        match self {
            Direction::Horizontal => [(0, -1), (0, 1)],
            Direction::Diagonal45 => [(-1, -1), (1, 1)],
            Direction::Vertical => [(-1, 0), (1, 0)],
            Direction::Diagonal135 => [(-1, 1), (1, -1)],
        }
    }
}

fn canny(luma: &Array2<f32>, low: f32, high: f32, blur_size: usize) -> Array2<u8> {
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let (height, width) = luma.dim();

    let kernel = gaussian_kernel_1d(blur_size, 0.0);
    let smoothed = convolve_separable(luma.view(), &kernel, &kernel);
    let grad = sobel_gradients(&smoothed);

    // Non-maximum suppression
    let mut thin = Array2::<f32>::zeros((height, width));
    Zip::indexed(&mut thin).par_for_each(|(y, x), out| {
        let mag = grad.magnitude[[y, x]];
        if mag <= 0.0 {
            return;
        }
        let dir = Direction::from_gradient(grad.gx[[y, x]], grad.gy[[y, x]]);
        let is_max = dir.neighbours().iter().all(|&(dy, dx)| {
            let ny = y as isize + dy;
            let nx = x as isize + dx;
            if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                return true;
            }
            mag >= grad.magnitude[[ny as usize, nx as usize]]
        });
        if is_max {
            *out = mag;
        }
    });

    // Double threshold + hysteresis (8-connectivity)
    let mut edges = Array2::<u8>::zeros((height, width));
    let mut queue = VecDeque::new();
    for ((y, x), &m) in thin.indexed_iter() {
        if m >= high && m > 0.0 {
            edges[[y, x]] = 255;
            queue.push_back((y, x));
        }
    }
    let strong = queue.len();

    while let Some((y, x)) = queue.pop_front() {
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                if dy == 0 && dx == 0 {
                    continue;
                }
                let ny = y as isize + dy;
                let nx = x as isize + dx;
                if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                    continue;
                }
                let (ny, nx) = (ny as usize, nx as usize);
                let m = thin[[ny, nx]];
                if edges[[ny, nx]] == 0 && m >= low && m > 0.0 {
                    edges[[ny, nx]] = 255;
                    queue.push_back((ny, nx));
                }
            }
        }
    }

    debug!(
        "canny: {strong} strong seeds, {} edge pixels after hysteresis",
        edges.iter().filter(|&&v| v > 0).count()
    );
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical_step(channels: usize) -> Image {
        Image::from_fn(9, 9, channels, |_, x, _| if x < 4 { 0 } else { 255 }).unwrap()
    }

    #[test]
    fn test_sobel_detects_vertical_edge() {
        let result = detect_edges(&vertical_step(3), &EdgeParams::Sobel).unwrap();
        assert_eq!(result.channels(), 3);
        assert_eq!(result.get(4, 4, 0), 255);
        assert_eq!(result.get(4, 4, 0), result.get(4, 4, 2));
        // Flat regions have no response, borders included
        assert_eq!(result.get(0, 4, 0), 0);
        assert_eq!(result.get(8, 4, 0), 0);
    }

    #[test]
    fn test_sobel_flat_is_zero() {
        let img = Image::filled(5, 5, 1, 128).unwrap();
        let result = detect_edges(&img, &EdgeParams::Sobel).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_canny_produces_thin_binary_edge() {
        let params = EdgeParams::Canny {
            low: 50.0,
            high: 100.0,
            blur_size: 3,
        };
        let result = detect_edges(&vertical_step(1), &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 0 || v == 255));

        for y in 0..9 {
            let count = (0..9).filter(|&x| result.get(x, y, 0) == 255).count();
            assert!(count >= 1 && count <= 2, "row {y} had {count} edge pixels");
        }
        assert_eq!(result.get(0, 4, 0), 0);
    }

    #[test]
    fn test_canny_swaps_inverted_thresholds() {
        let a = EdgeParams::Canny {
            low: 100.0,
            high: 50.0,
            blur_size: 3,
        };
        let b = EdgeParams::Canny {
            low: 50.0,
            high: 100.0,
            blur_size: 3,
        };
        let img = vertical_step(1);
        assert_eq!(detect_edges(&img, &a).unwrap(), detect_edges(&img, &b).unwrap());
    }

    #[test]
    fn test_canny_hysteresis_drops_isolated_weak_edges() {
        let params = EdgeParams::Canny {
            low: 10.0,
            high: 100_000.0,
            blur_size: 3,
        };
        let result = detect_edges(&vertical_step(1), &params).unwrap();
        assert!(result.as_array().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_canny_rejects_negative_threshold() {
        let params = EdgeParams::Canny {
            low: -1.0,
            high: 10.0,
            blur_size: 3,
        };
        assert!(detect_edges(&vertical_step(1), &params).is_err());
    }
}
