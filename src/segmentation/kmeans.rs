//! K-means color clustering.
//!
//! Lloyd's algorithm over pixel colors with deterministic seeding: the
//! initial centroids are the colors at evenly spaced quantiles of the
//! luminance-sorted pixels, so identical inputs always give identical
//! segmentations.

use log::debug;
use ndarray::{Array2, Array3, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::{Image, LUMA_B, LUMA_G, LUMA_R};
use crate::error::{ensure_range, FilterError, Result};
use crate::filters::core::clamp_u8;

/// Parameters for [`kmeans_segment`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Number of clusters in [2, 10].
    pub k: usize,
    /// Iteration cap in [1, 300].
    pub max_iterations: usize,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            k: 3,
            max_iterations: 100,
        }
    }
}

impl KMeansParams {
    pub fn validate(&self) -> Result<()> {
        ensure_range("k", self.k, 2, 10)?;
        ensure_range("max_iterations", self.max_iterations, 1, 300)
    }
}

/// Outcome of Lloyd's algorithm on an `(n, d)` point matrix.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// Label per point, dense in `[0, centroids.nrows())`.
    pub labels: Vec<usize>,
    /// One row per non-empty cluster.
    pub centroids: Array2<f64>,
    /// Assignment passes performed.
    pub iterations: usize,
    /// Whether the last pass changed no assignment.
    pub converged: bool,
}

/// Result of [`kmeans_segment`].
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Each pixel replaced by its cluster centroid.
    pub image: Image,
    /// Label map with shape (height, width).
    pub labels: Array2<usize>,
    /// Centroid colors, one row per label.
    pub centroids: Array2<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Segment an image by clustering its colors.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Cluster count and iteration cap
///
/// # Returns
/// Quantized image plus labels and centroids
pub fn kmeans_segment(image: &Image, params: &KMeansParams) -> Result<KMeansResult> {
    params.validate()?;
    let (height, width, channels) = image.as_array().dim();
    let points = pixel_matrix(image);

    let clustering = lloyd(&points, params.k, params.max_iterations);
    debug!(
        "kmeans: k={} -> {} clusters after {} iterations (converged: {})",
        params.k,
        clustering.centroids.nrows(),
        clustering.iterations,
        clustering.converged
    );

    let data = Array3::from_shape_fn((height, width, channels), |(y, x, c)| {
        let label = clustering.labels[y * width + x];
        clamp_u8(clustering.centroids[[label, c]] as f32)
    });
    let labels = Array2::from_shape_vec((height, width), clustering.labels)
        .map_err(|e| FilterError::InternalFailure(e.to_string()))?;

    Ok(KMeansResult {
        image: Image::from_array(data),
        labels,
        centroids: clustering.centroids,
        iterations: clustering.iterations,
        converged: clustering.converged,
    })
}

/// Pixels as an `(n, channels)` matrix of f64 colors.
pub(crate) fn pixel_matrix(image: &Image) -> Array2<f64> {
    let (height, width, channels) = image.as_array().dim();
    Array2::from_shape_fn((height * width, channels), |(i, c)| {
        image.as_array()[[i / width, i % width, c]] as f64
    })
}

fn seed_key(point: ArrayView1<f64>) -> f64 {
    if point.len() == 3 {
        LUMA_R as f64 * point[0] + LUMA_G as f64 * point[1] + LUMA_B as f64 * point[2]
    } else {
        point.sum()
    }
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest centroid; ties go to the lowest index.
fn nearest(point: ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let d = squared_distance(point, centroid);
        if d < best_dist {
            best_dist = d;
            best = j;
        }
    }
    best
}

/// Lloyd's algorithm with quantile seeding and label compaction.
///
/// Assignment runs in parallel over points and completes before centroids
/// are recomputed. Empty clusters keep their previous centroid.
pub(crate) fn lloyd(points: &Array2<f64>, k: usize, max_iterations: usize) -> Clustering {
    let n = points.nrows();
    let dims = points.ncols();
    let k = k.min(n).max(1);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        seed_key(points.row(a))
            .total_cmp(&seed_key(points.row(b)))
            .then(a.cmp(&b))
    });
    let mut centroids = Array2::<f64>::zeros((k, dims));
    for j in 0..k {
        let idx = order[((2 * j + 1) * n / (2 * k)).min(n - 1)];
        centroids.row_mut(j).assign(&points.row(idx));
    }

    let mut labels = vec![usize::MAX; n];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;
        let assigned: Vec<usize> = (0..n)
            .into_par_iter()
            .map(|i| nearest(points.row(i), &centroids))
            .collect();

        let changed = assigned != labels;
        labels = assigned;
        if !changed {
            converged = true;
            break;
        }

        let mut sums = Array2::<f64>::zeros((k, dims));
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            let mut row = sums.row_mut(label);
            row += &points.row(i);
            counts[label] += 1;
        }
        for j in 0..k {
            if counts[j] > 0 {
                let mean = &sums.row(j) / counts[j] as f64;
                centroids.row_mut(j).assign(&mean);
            }
        }
    }

    compact(labels, &centroids, iterations, converged)
}

/// Renumber the used labels to a dense range, preserving their order.
fn compact(labels: Vec<usize>, centroids: &Array2<f64>, iterations: usize, converged: bool) -> Clustering {
    let k = centroids.nrows();
    let mut used = vec![false; k];
    for &l in &labels {
        used[l] = true;
    }
    let mut remap = vec![0usize; k];
    let mut kept = Vec::new();
    for j in 0..k {
        if used[j] {
            remap[j] = kept.len();
            kept.push(j);
        }
    }

    let compacted = centroids.select(Axis(0), &kept);
    let labels = labels.into_iter().map(|l| remap[l]).collect();
    Clustering {
        labels,
        centroids: compacted,
        iterations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_colors() -> Image {
        let colors = [[200u8, 30, 30], [30, 200, 30], [30, 30, 200]];
        Image::from_fn(12, 6, 3, |_, x, c| colors[x / 4][c]).unwrap()
    }

    #[test]
    fn test_labels_in_range_and_terminates() {
        let img = Image::from_fn(16, 16, 3, |y, x, c| ((x * 16 + y * 3 + c * 70) % 256) as u8).unwrap();
        let params = KMeansParams {
            k: 3,
            max_iterations: 20,
        };
        let result = kmeans_segment(&img, &params).unwrap();
        assert!(result.labels.iter().all(|&l| l < 3));
        assert!(result.iterations <= 20);
        assert_eq!(result.image.as_array().dim(), img.as_array().dim());
    }

    #[test]
    fn test_separable_colors_are_recovered() {
        let img = three_colors();
        let result = kmeans_segment(&img, &KMeansParams::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.image, img);
        assert_eq!(result.centroids.nrows(), 3);
        assert_ne!(result.labels[[0, 0]], result.labels[[0, 5]]);
        assert_ne!(result.labels[[0, 5]], result.labels[[0, 10]]);
    }

    #[test]
    fn test_deterministic() {
        let img = Image::from_fn(10, 10, 1, |y, x, _| ((x * 29 + y * 13) % 256) as u8).unwrap();
        let params = KMeansParams {
            k: 4,
            max_iterations: 50,
        };
        let a = kmeans_segment(&img, &params).unwrap();
        let b = kmeans_segment(&img, &params).unwrap();
        assert_eq!(a.image, b.image);
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn test_unused_clusters_are_compacted() {
        let img = Image::from_fn(4, 4, 1, |_, x, _| if x < 2 { 10 } else { 240 }).unwrap();
        let params = KMeansParams {
            k: 4,
            max_iterations: 10,
        };
        let result = kmeans_segment(&img, &params).unwrap();
        assert_eq!(result.centroids.nrows(), 2);
        assert!(result.labels.iter().all(|&l| l < 2));
        assert_eq!(result.image, img);
    }

    #[test]
    fn test_rejects_out_of_range_k() {
        let img = three_colors();
        for k in [1, 11] {
            let params = KMeansParams {
                k,
                max_iterations: 10,
            };
            assert!(kmeans_segment(&img, &params).is_err());
        }
    }
}
