//! Interactive foreground extraction (GrabCut).
//!
//! Foreground and background colors are modelled by Gaussian mixtures;
//! each iteration re-fits the mixtures to the current labelling and solves
//! an s-t minimum cut whose terminal weights are the mixture likelihoods
//! and whose 8-connected neighbour weights penalize cutting between similar
//! colors. Pixels outside the rectangle are hard background.

use log::debug;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use super::kmeans::{lloyd, pixel_matrix};
use super::maxflow::FlowGraph;
use crate::buffer::Image;
use crate::error::{ensure_range, FilterError, Result};

/// Mixture components per model.
pub const GMM_COMPONENTS: usize = 5;
/// Smoothness weight of the neighbour links.
const GAMMA: f64 = 50.0;
/// Diagonal regularization of every covariance.
const COVARIANCE_REG: f64 = 0.01;

/// Pixel rectangle `(x, y, width, height)` enclosing the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    /// Full image minus a `margin` fraction on every side (at least 1 px).
    pub fn with_margin(width: usize, height: usize, margin: f32) -> Rect {
        let mx = ((width as f32 * margin) as usize).max(1);
        let my = ((height as f32 * margin) as usize).max(1);
        Rect {
            x: mx,
            y: my,
            width: width.saturating_sub(2 * mx),
            height: height.saturating_sub(2 * my),
        }
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Parameters for [`grabcut`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabCutParams {
    /// Refinement rounds in [1, 20].
    pub iterations: usize,
    /// Margin fraction for the default rectangle, in [0, 0.45].
    pub margin: f32,
    /// Explicit rectangle; overrides `margin` when set.
    pub rect: Option<Rect>,
}

impl Default for GrabCutParams {
    fn default() -> Self {
        Self {
            iterations: 5,
            margin: 0.1,
            rect: None,
        }
    }
}

impl GrabCutParams {
    pub fn validate(&self) -> Result<()> {
        ensure_range("iterations", self.iterations, 1, 20)?;
        ensure_range("margin", self.margin, 0.0, 0.45)
    }

    fn resolve_rect(&self, width: usize, height: usize) -> Result<Rect> {
        let rect = self
            .rect
            .unwrap_or_else(|| Rect::with_margin(width, height, self.margin));
        if rect.width == 0 || rect.height == 0 {
            return Err(FilterError::invalid(format!(
                "grabcut rectangle is empty for a {width}x{height} image"
            )));
        }
        let right = rect.x.checked_add(rect.width);
        let bottom = rect.y.checked_add(rect.height);
        if right.map_or(true, |r| r > width) || bottom.map_or(true, |b| b > height) {
            return Err(FilterError::invalid(format!(
                "grabcut rectangle {rect:?} exceeds the {width}x{height} image"
            )));
        }
        if rect.x == 0 && rect.y == 0 && rect.width == width && rect.height == height {
            return Err(FilterError::invalid(
                "grabcut rectangle must leave some background outside it",
            ));
        }
        Ok(rect)
    }
}

// ============================================================================
// Gaussian Mixture Model
// ============================================================================

#[derive(Debug, Clone)]
struct Component {
    mean: [f64; 3],
    inverse: [[f64; 3]; 3],
    /// `ln(weight) - 0.5 * ln(det)`.
    log_norm: f64,
}

/// Full-covariance Gaussian mixture over RGB colors.
#[derive(Debug, Clone)]
struct Gmm {
    components: Vec<Component>,
}

impl Gmm {
    /// Fit to `samples` with a given hard assignment of samples to components.
    fn fit(samples: &[[f64; 3]], assignment: &[usize], n_components: usize) -> Gmm {
        let total = samples.len().max(1) as f64;
        let mut components = Vec::with_capacity(n_components);

        for k in 0..n_components {
            let members: Vec<&[f64; 3]> = samples
                .iter()
                .zip(assignment)
                .filter(|(_, &a)| a == k)
                .map(|(s, _)| s)
                .collect();
            if members.is_empty() {
                continue;
            }
            let n = members.len() as f64;
            let mut mean = [0.0; 3];
            for s in &members {
                for c in 0..3 {
                    mean[c] += s[c] / n;
                }
            }
            let mut cov = [[0.0; 3]; 3];
            for s in &members {
                for i in 0..3 {
                    for j in 0..3 {
                        cov[i][j] += (s[i] - mean[i]) * (s[j] - mean[j]) / n;
                    }
                }
            }
            for (i, row) in cov.iter_mut().enumerate() {
                row[i] += COVARIANCE_REG;
            }

            let det = determinant(&cov);
            let inverse = invert(&cov, det);
            let weight = n / total;
            components.push(Component {
                mean,
                inverse,
                log_norm: weight.ln() - 0.5 * det.ln(),
            });
        }

        Gmm { components }
    }

    /// Log-density of one component, without the constant `2*pi` term.
    fn component_log_density(comp: &Component, color: &[f64; 3]) -> f64 {
        let d = [
            color[0] - comp.mean[0],
            color[1] - comp.mean[1],
            color[2] - comp.mean[2],
        ];
        let mut mahalanobis = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                mahalanobis += d[i] * comp.inverse[i][j] * d[j];
            }
        }
        comp.log_norm - 0.5 * mahalanobis
    }

    /// Most likely component for a color.
    fn best_component(&self, color: &[f64; 3]) -> usize {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (k, comp) in self.components.iter().enumerate() {
            let score = Self::component_log_density(comp, color);
            if score > best_score {
                best_score = score;
                best = k;
            }
        }
        best
    }

    /// `-ln p(color)` under the mixture (log-sum-exp over components).
    fn neg_log_likelihood(&self, color: &[f64; 3]) -> f64 {
        let scores: Vec<f64> = self
            .components
            .iter()
            .map(|comp| Self::component_log_density(comp, color))
            .collect();
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return 1e6;
        }
        let sum: f64 = scores.iter().map(|s| (s - max).exp()).sum();
        -(max + sum.ln())
    }
}

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1]) - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn invert(m: &[[f64; 3]; 3], det: f64) -> [[f64; 3]; 3] {
    let inv_det = 1.0 / det;
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ]
}

/// Initial mixture from k-means clustering of the samples.
fn initial_gmm(samples: &[[f64; 3]]) -> Gmm {
    let points = Array2::from_shape_fn((samples.len(), 3), |(i, c)| samples[i][c]);
    let clustering = lloyd(&points, GMM_COMPONENTS, 10);
    Gmm::fit(samples, &clustering.labels, clustering.centroids.nrows())
}

// ============================================================================
// GrabCut
// ============================================================================

/// 8-connected forward neighbour offsets (dy, dx); each pair is linked once.
const FORWARD_NEIGHBOURS: [(isize, isize); 4] = [(0, 1), (1, -1), (1, 0), (1, 1)];

/// Extract the foreground inside the rectangle.
///
/// # Arguments
/// * `image` - RGB image
/// * `params` - Iterations and rectangle
///
/// # Returns
/// Copy of the image with every background pixel set to 0
pub fn grabcut(image: &Image, params: &GrabCutParams) -> Result<Image> {
    let mask = grabcut_mask(image, params)?;
    let mut data: Array3<u8> = image.as_array().clone();
    for ((y, x, _), v) in data.indexed_iter_mut() {
        if !mask[[y, x]] {
            *v = 0;
        }
    }
    Ok(Image::from_array(data))
}

/// Foreground mask (`true` = foreground) computed by GrabCut.
pub fn grabcut_mask(image: &Image, params: &GrabCutParams) -> Result<Array2<bool>> {
    params.validate()?;
    image.require_rgb("grabcut")?;
    let (width, height) = (image.width(), image.height());
    let rect = params.resolve_rect(width, height)?;

    let colors: Vec<[f64; 3]> = pixel_matrix(image)
        .outer_iter()
        .map(|row| [row[0], row[1], row[2]])
        .collect();
    let mut foreground: Vec<bool> = (0..width * height)
        .map(|i| rect.contains(i % width, i / width))
        .collect();

    let beta = smoothness_beta(&colors, width, height);
    let links = neighbour_links(&colors, width, height, beta);
    let hard_bg_weight = 1.0 + links.iter().map(|&(_, _, w)| w).fold(0.0, f64::max) * 8.0;

    for iteration in 0..params.iterations {
        let (fg_samples, bg_samples): (Vec<_>, Vec<_>) = colors
            .iter()
            .zip(&foreground)
            .partition(|(_, &fg)| fg);
        let fg_samples: Vec<[f64; 3]> = fg_samples.into_iter().map(|(c, _)| *c).collect();
        let bg_samples: Vec<[f64; 3]> = bg_samples.into_iter().map(|(c, _)| *c).collect();
        if fg_samples.is_empty() {
            debug!("grabcut: foreground vanished after {iteration} iteration(s)");
            break;
        }

        let fg_gmm = refit(&fg_samples);
        let bg_gmm = refit(&bg_samples);

        let n = width * height;
        let (source, sink) = (n, n + 1);
        let mut graph = FlowGraph::new(n + 2);
        for (i, color) in colors.iter().enumerate() {
            if rect.contains(i % width, i / width) {
                // Equal shift of both terminals keeps capacities non-negative
                let to_bg = bg_gmm.neg_log_likelihood(color);
                let to_fg = fg_gmm.neg_log_likelihood(color);
                let floor = to_bg.min(to_fg);
                graph.add_edge(source, i, to_bg - floor, 0.0);
                graph.add_edge(i, sink, to_fg - floor, 0.0);
            } else {
                graph.add_edge(i, sink, hard_bg_weight, 0.0);
            }
        }
        for &(a, b, w) in &links {
            graph.add_edge(a, b, w, w);
        }

        let flow = graph.max_flow(source, sink);
        let side = graph.source_side(source);
        let mut changed = 0usize;
        for (i, fg) in foreground.iter_mut().enumerate() {
            let now = side[i] && rect.contains(i % width, i / width);
            if now != *fg {
                changed += 1;
            }
            *fg = now;
        }
        debug!("grabcut: iteration {} flow {flow:.1}, {changed} pixel(s) changed", iteration + 1);
        if changed == 0 {
            break;
        }
    }

    Array2::from_shape_vec((height, width), foreground)
        .map_err(|e| FilterError::InternalFailure(e.to_string()))
}

/// Assign samples to the best component of an initial fit, then re-fit.
fn refit(samples: &[[f64; 3]]) -> Gmm {
    let init = initial_gmm(samples);
    let assignment: Vec<usize> = samples.iter().map(|c| init.best_component(c)).collect();
    let refined = Gmm::fit(samples, &assignment, init.components.len());
    if refined.components.is_empty() {
        init
    } else {
        refined
    }
}

/// `beta = 1 / (2 * mean ||c_p - c_q||^2)` over all 8-connected pairs.
fn smoothness_beta(colors: &[[f64; 3]], width: usize, height: usize) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for_each_pair(width, height, |a, b, _| {
        sum += color_distance_sq(&colors[a], &colors[b]);
        count += 1;
    });
    if count == 0 || sum <= 0.0 {
        return 0.0;
    }
    1.0 / (2.0 * sum / count as f64)
}

/// Neighbour links `(a, b, weight)` with `gamma / dist * exp(-beta * ||c_a - c_b||^2)`.
fn neighbour_links(colors: &[[f64; 3]], width: usize, height: usize, beta: f64) -> Vec<(usize, usize, f64)> {
    let mut links = Vec::new();
    for_each_pair(width, height, |a, b, dist| {
        let w = GAMMA / dist * (-beta * color_distance_sq(&colors[a], &colors[b])).exp();
        links.push((a, b, w));
    });
    links
}

fn for_each_pair<F>(width: usize, height: usize, mut f: F)
where
    F: FnMut(usize, usize, f64),
{
    for y in 0..height {
        for x in 0..width {
            for &(dy, dx) in &FORWARD_NEIGHBOURS {
                let (ny, nx) = (y as isize + dy, x as isize + dx);
                if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                    continue;
                }
                let dist = if dy != 0 && dx != 0 { std::f64::consts::SQRT_2 } else { 1.0 };
                f(y * width + x, ny as usize * width + nx as usize, dist);
            }
        }
    }
}

fn color_distance_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (0..3).map(|c| (a[c] - b[c]) * (a[c] - b[c])).sum()
}
