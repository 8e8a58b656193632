//! Feature extraction: named numeric descriptors of an image.
//!
//! Profiles:
//! - **basic** - per channel `mean`, `std`, `min`, `max`
//! - **texture** - grey-level co-occurrence statistics of the luminance
//!   plus the mean 3x3 local contrast
//! - **color_histogram** - per channel bucket proportions
//!
//! Channels are named `gray` for 1-channel images and `red`, `green`,
//! `blue` for RGB. Extraction never modifies the image.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::Image;
use crate::error::{ensure_range, FilterError, Result};
use crate::filters::core::{clamp_index, histogram};
use crate::metrics::mean_var;

/// Grey levels of the co-occurrence matrix.
pub const GLCM_LEVELS: usize = 32;

/// `(dy, dx)` neighbour offsets for 0°, 45°, 90° and 135° at distance 1.
const GLCM_OFFSETS: [(isize, isize); 4] = [(0, 1), (-1, 1), (-1, 0), (-1, -1)];

/// Ordered metric-name to value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureVector(BTreeMap<String, f64>);

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| FilterError::InternalFailure(e.to_string()))
    }
}

/// Which descriptors to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureProfile {
    #[default]
    Basic,
    Texture,
    #[serde(alias = "color_hist")]
    ColorHistogram,
}

impl std::str::FromStr for FeatureProfile {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(FeatureProfile::Basic),
            "texture" => Ok(FeatureProfile::Texture),
            "color_histogram" | "color_hist" => Ok(FeatureProfile::ColorHistogram),
            other => Err(FilterError::invalid(format!("unknown feature profile '{other}'"))),
        }
    }
}

/// Parameters for [`extract_features`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    pub profile: FeatureProfile,
    /// Histogram buckets per channel in [2, 256]; only read by `color_histogram`.
    pub bins: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            profile: FeatureProfile::Basic,
            bins: 16,
        }
    }
}

impl FeatureParams {
    pub fn validate(&self) -> Result<()> {
        ensure_range("bins", self.bins, 2, 256)
    }
}

/// Compute the descriptors of the requested profile.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Profile and histogram bucket count
///
/// # Returns
/// Feature vector keyed by metric name
pub fn extract_features(image: &Image, params: &FeatureParams) -> Result<FeatureVector> {
    params.validate()?;
    Ok(match params.profile {
        FeatureProfile::Basic => basic_features(image),
        FeatureProfile::Texture => texture_features(image),
        FeatureProfile::ColorHistogram => color_histogram(image, params.bins),
    })
}

fn channel_names(image: &Image) -> &'static [&'static str] {
    if image.is_gray() {
        &["gray"]
    } else {
        &["red", "green", "blue"]
    }
}

// ============================================================================
// Basic
// ============================================================================

pub fn basic_features(image: &Image) -> FeatureVector {
    let mut features = FeatureVector::new();
    for (c, name) in channel_names(image).iter().enumerate() {
        let plane = image.channel(c);
        let (mean, var) = mean_var(plane.iter().map(|&v| v as f64));
        let min = plane.iter().copied().min().unwrap_or(0);
        let max = plane.iter().copied().max().unwrap_or(0);
        features.insert(format!("{name}_mean"), mean);
        features.insert(format!("{name}_std"), var.sqrt());
        features.insert(format!("{name}_min"), min as f64);
        features.insert(format!("{name}_max"), max as f64);
    }
    features
}

// ============================================================================
// Texture
// ============================================================================

/// Statistics of one normalized co-occurrence matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlcmStats {
    pub contrast: f64,
    pub dissimilarity: f64,
    pub homogeneity: f64,
    pub energy: f64,
    pub asm: f64,
    pub correlation: f64,
    pub entropy: f64,
}

impl GlcmStats {
    fn from_matrix(p: &Array2<f64>) -> Self {
        let mut stats = GlcmStats::default();
        let (mut mu_i, mut mu_j) = (0.0, 0.0);
        for ((i, j), &v) in p.indexed_iter() {
            mu_i += i as f64 * v;
            mu_j += j as f64 * v;
        }
        let (mut var_i, mut var_j, mut cov) = (0.0, 0.0, 0.0);
        for ((i, j), &v) in p.indexed_iter() {
            if v == 0.0 {
                continue;
            }
            let d = i as f64 - j as f64;
            stats.contrast += v * d * d;
            stats.dissimilarity += v * d.abs();
            stats.homogeneity += v / (1.0 + d * d);
            stats.asm += v * v;
            stats.entropy -= v * v.log2();
            var_i += v * (i as f64 - mu_i).powi(2);
            var_j += v * (j as f64 - mu_j).powi(2);
            cov += v * (i as f64 - mu_i) * (j as f64 - mu_j);
        }
        stats.energy = stats.asm.sqrt();
        let denom = (var_i * var_j).sqrt();
        // A single grey level is perfectly correlated with itself.
        stats.correlation = if denom < 1e-15 { 1.0 } else { cov / denom };
        stats
    }

    fn mean(all: &[GlcmStats]) -> Self {
        let n = all.len().max(1) as f64;
        let sum = |f: fn(&GlcmStats) -> f64| all.iter().map(f).sum::<f64>() / n;
        GlcmStats {
            contrast: sum(|s| s.contrast),
            dissimilarity: sum(|s| s.dissimilarity),
            homogeneity: sum(|s| s.homogeneity),
            energy: sum(|s| s.energy),
            asm: sum(|s| s.asm),
            correlation: sum(|s| s.correlation),
            entropy: sum(|s| s.entropy),
        }
    }
}

/// Symmetric, normalized co-occurrence matrix for one offset.
///
/// Returns `None` when the image is too small to hold any pair.
pub fn glcm(levels: ArrayView2<u8>, offset: (isize, isize)) -> Option<Array2<f64>> {
    let (height, width) = levels.dim();
    let (dy, dx) = offset;
    let mut counts = Array2::<f64>::zeros((GLCM_LEVELS, GLCM_LEVELS));
    let mut pairs = 0usize;
    for y in 0..height {
        for x in 0..width {
            let ny = y as isize + dy;
            let nx = x as isize + dx;
            if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                continue;
            }
            let a = levels[[y, x]] as usize;
            let b = levels[[ny as usize, nx as usize]] as usize;
            counts[[a, b]] += 1.0;
            counts[[b, a]] += 1.0;
            pairs += 2;
        }
    }
    if pairs == 0 {
        return None;
    }
    counts /= pairs as f64;
    Some(counts)
}

/// Mean over pixels of the 3x3 neighbourhood standard deviation.
pub fn local_contrast(plane: ArrayView2<u8>) -> f64 {
    let (height, width) = plane.dim();
    let mut local = Array2::<f64>::zeros((height, width));
    Zip::indexed(&mut local).par_for_each(|(y, x), out| {
        let mut window = [0.0f64; 9];
        let mut n = 0;
        for dy in -1isize..=1 {
            for dx in -1isize..=1 {
                let sy = clamp_index(y as isize + dy, height);
                let sx = clamp_index(x as isize + dx, width);
                window[n] = plane[[sy, sx]] as f64;
                n += 1;
            }
        }
        let (_, var) = mean_var(window.iter().copied());
        *out = var.sqrt();
    });
    local.mean().unwrap_or(0.0)
}

pub fn texture_features(image: &Image) -> FeatureVector {
    let luma = image.to_luma();
    let shift = (256 / GLCM_LEVELS).trailing_zeros();
    let levels = luma.mapv(|v| v >> shift);

    let per_angle: Vec<GlcmStats> = GLCM_OFFSETS
        .par_iter()
        .filter_map(|&offset| glcm(levels.view(), offset))
        .map(|p| GlcmStats::from_matrix(&p))
        .collect();

    let stats = if per_angle.is_empty() {
        // Single pixel: all mass on one diagonal cell.
        let mut p = Array2::<f64>::zeros((GLCM_LEVELS, GLCM_LEVELS));
        let q = levels[[0, 0]] as usize;
        p[[q, q]] = 1.0;
        GlcmStats::from_matrix(&p)
    } else {
        GlcmStats::mean(&per_angle)
    };

    let mut features = FeatureVector::new();
    features.insert("glcm_contrast", stats.contrast);
    features.insert("glcm_dissimilarity", stats.dissimilarity);
    features.insert("glcm_homogeneity", stats.homogeneity);
    features.insert("glcm_energy", stats.energy);
    features.insert("glcm_asm", stats.asm);
    features.insert("glcm_correlation", stats.correlation);
    features.insert("glcm_entropy", stats.entropy);
    features.insert("local_contrast", local_contrast(luma.view()));
    features
}

// ============================================================================
// Color Histogram
// ============================================================================

pub fn color_histogram(image: &Image, bins: usize) -> FeatureVector {
    let bins = bins.clamp(2, 256);
    let digits = (bins - 1).to_string().len().max(2);
    let total = image.pixel_count() as f64;

    let mut features = FeatureVector::new();
    for (c, name) in channel_names(image).iter().enumerate() {
        let hist = histogram(image.channel(c));
        let mut buckets = vec![0u64; bins];
        for (value, &count) in hist.iter().enumerate() {
            buckets[value * bins / 256] += count;
        }
        for (b, &count) in buckets.iter().enumerate() {
            features.insert(format!("{name}_hist_{b:0digits$}"), count as f64 / total);
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripes() -> Image {
        Image::from_fn(16, 16, 1, |_, x, _| if x % 2 == 0 { 0 } else { 255 }).unwrap()
    }

    #[test]
    fn test_basic_rgb() {
        let img = Image::from_fn(2, 2, 3, |y, x, c| ((y * 2 + x) * 10 + c) as u8).unwrap();
        let f = basic_features(&img);
        assert_eq!(f.len(), 12);
        assert_eq!(f.get("red_mean"), Some(15.0));
        assert_eq!(f.get("green_min"), Some(1.0));
        assert_eq!(f.get("blue_max"), Some(32.0));
        let std = f.get("red_std").unwrap();
        assert!((std - 125.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_basic_gray_names() {
        let f = basic_features(&Image::filled(3, 3, 1, 9).unwrap());
        assert_eq!(f.get("gray_mean"), Some(9.0));
        assert_eq!(f.get("gray_std"), Some(0.0));
        assert!(f.get("red_mean").is_none());
    }

    #[test]
    fn test_glcm_is_symmetric_and_normalized() {
        let img = Image::from_fn(9, 7, 1, |y, x, _| ((x * 40 + y * 17) % 256) as u8).unwrap();
        let levels = img.to_luma().mapv(|v| v >> 3);
        for &offset in &GLCM_OFFSETS {
            let p = glcm(levels.view(), offset).unwrap();
            assert!((p.sum() - 1.0).abs() < 1e-12);
            for i in 0..GLCM_LEVELS {
                for j in 0..GLCM_LEVELS {
                    assert_eq!(p[[i, j]], p[[j, i]]);
                }
            }
        }
    }

    #[test]
    fn test_constant_texture() {
        let f = texture_features(&Image::filled(8, 8, 1, 100).unwrap());
        assert_eq!(f.get("glcm_contrast"), Some(0.0));
        assert_eq!(f.get("glcm_homogeneity"), Some(1.0));
        assert_eq!(f.get("glcm_energy"), Some(1.0));
        assert_eq!(f.get("glcm_correlation"), Some(1.0));
        assert_eq!(f.get("glcm_entropy"), Some(0.0));
        assert_eq!(f.get("local_contrast"), Some(0.0));
    }

    #[test]
    fn test_stripes_are_high_contrast() {
        let f = texture_features(&stripes());
        let smooth = texture_features(&Image::from_fn(16, 16, 1, |_, x, _| (x * 8) as u8).unwrap());
        assert!(f.get("glcm_contrast").unwrap() > smooth.get("glcm_contrast").unwrap());
        assert!(f.get("local_contrast").unwrap() > 100.0);
    }

    #[test]
    fn test_single_pixel_texture() {
        let f = texture_features(&Image::filled(1, 1, 1, 5).unwrap());
        assert_eq!(f.get("glcm_asm"), Some(1.0));
    }

    #[test]
    fn test_histogram_sums_to_one() {
        let img = Image::from_fn(10, 10, 3, |y, x, c| ((x * 25 + y * 3 + c * 90) % 256) as u8).unwrap();
        let f = extract_features(
            &img,
            &FeatureParams {
                profile: FeatureProfile::ColorHistogram,
                bins: 8,
            },
        )
        .unwrap();
        assert_eq!(f.len(), 24);
        for name in ["red", "green", "blue"] {
            let sum: f64 = f.iter().filter(|(k, _)| k.starts_with(name)).map(|(_, v)| v).sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        assert!(f.get("red_hist_07").is_some());
    }

    #[test]
    fn test_histogram_bucket_placement() {
        let img = Image::filled(4, 4, 1, 255).unwrap();
        let f = color_histogram(&img, 16);
        assert_eq!(f.get("gray_hist_15"), Some(1.0));
        assert_eq!(f.get("gray_hist_00"), Some(0.0));
    }

    #[test]
    fn test_bins_validated_and_profile_parsing() {
        let img = stripes();
        let params = FeatureParams {
            profile: FeatureProfile::ColorHistogram,
            bins: 1,
        };
        assert!(extract_features(&img, &params).is_err());
        assert_eq!("color_hist".parse::<FeatureProfile>().unwrap(), FeatureProfile::ColorHistogram);
        assert!("nope".parse::<FeatureProfile>().is_err());
    }

    #[test]
    fn test_json_output() {
        let f = basic_features(&Image::filled(2, 2, 1, 4).unwrap());
        let json = f.to_json().unwrap();
        assert!(json.starts_with("{\"gray_max\":4.0"));
    }
}
