//! Color filters: Color Balance, Color Space conversion, Pseudocolor,
//! Color Smoothing.
//!
//! ## Supported Formats
//!
//! - **Grayscale (1 channel)**: pseudocolor and conversion to gray only
//! - **RGB (3 channels)**: everything

use ndarray::{Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::core::{clamp_u8, convolve_separable, gaussian_kernel_1d, MAX_KERNEL_SIZE};
use crate::buffer::Image;
use crate::error::{ensure_odd_kernel, ensure_positive, FilterError, Result};

// ============================================================================
// Color Space Conversion Utilities
// ============================================================================

/// Convert RGB to HSV.
/// Input: r, g, b in 0.0-1.0
/// Output: (h, s, v) where h is 0.0-360.0, s and v are 0.0-1.0
#[inline]
pub(crate) fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let d = max - min;

    let s = if max > 0.0 { d / max } else { 0.0 };
    if d < 1e-6 {
        return (0.0, s, max);
    }

    let mut h = if max == r {
        60.0 * (g - b) / d
    } else if max == g {
        60.0 * ((b - r) / d + 2.0)
    } else {
        60.0 * ((r - g) / d + 4.0)
    };
    if h < 0.0 {
        h += 360.0;
    }
    (h, s, max)
}

/// Convert HSV to RGB.
/// Input: h in 0.0-360.0, s and v in 0.0-1.0
/// Output: (r, g, b) in 0.0-1.0
#[inline]
pub(crate) fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let hp = (h.rem_euclid(360.0)) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (r + m, g + m, b + m)
}

/// sRGB transfer function inverse.
#[inline]
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > 0.008856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

/// Convert RGB (0.0-1.0) to CIE L*a*b* under D65.
/// Output: L in 0-100, a and b roughly in -128..127
#[inline]
pub(crate) fn rgb_to_lab(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / 0.950456;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / 1.088754;

    let l = if y > 0.008856 {
        116.0 * y.cbrt() - 16.0
    } else {
        903.3 * y
    };
    let a = 500.0 * (lab_f(x) - lab_f(y));
    let bb = 200.0 * (lab_f(y) - lab_f(z));
    (l, a, bb)
}

/// Full-range (JPEG) RGB → YCbCr planes.
pub(crate) fn rgb_to_ycbcr(image: &Image) -> [Array2<f32>; 3] {
    let data = image.view();
    let dim = (image.height(), image.width());
    let mut y_plane = Array2::<f32>::zeros(dim);
    let mut cb_plane = Array2::<f32>::zeros(dim);
    let mut cr_plane = Array2::<f32>::zeros(dim);

    Zip::indexed(&mut y_plane)
        .and(&mut cb_plane)
        .and(&mut cr_plane)
        .par_for_each(|(y, x), yy, cb, cr| {
            let r = data[[y, x, 0]] as f32;
            let g = data[[y, x, 1]] as f32;
            let b = data[[y, x, 2]] as f32;
            *yy = 0.299 * r + 0.587 * g + 0.114 * b;
            *cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
            *cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
        });

    [y_plane, cb_plane, cr_plane]
}

/// Full-range YCbCr planes → RGB image.
pub(crate) fn ycbcr_to_rgb(planes: &[Array2<f32>; 3]) -> Image {
    let (height, width) = planes[0].dim();
    let data = Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
        let yy = planes[0][[y, x]];
        let cb = planes[1][[y, x]] - 128.0;
        let cr = planes[2][[y, x]] - 128.0;
        let v = match c {
            0 => yy + 1.402 * cr,
            1 => yy - 0.344136 * cb - 0.714136 * cr,
            _ => yy + 1.772 * cb,
        };
        clamp_u8(v)
    });
    Image::from_array(data)
}

// ============================================================================
// Color Balance
// ============================================================================

/// Per-channel gain factors in (0, 5].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorBalanceParams {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Default for ColorBalanceParams {
    fn default() -> Self {
        Self {
            red: 1.0,
            green: 1.0,
            blue: 1.0,
        }
    }
}

impl ColorBalanceParams {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("red", self.red, 5.0)?;
        ensure_positive("green", self.green, 5.0)?;
        ensure_positive("blue", self.blue, 5.0)
    }
}

/// Scale each RGB channel by its factor.
pub fn color_balance(image: &Image, params: &ColorBalanceParams) -> Result<Image> {
    params.validate()?;
    image.require_rgb("color balance")?;
    let gains = [params.red, params.green, params.blue];
    let mut output = image.as_array().clone();
    Zip::indexed(&mut output).par_for_each(|(_, _, c), v| {
        *v = clamp_u8(*v as f32 * gains[c]);
    });
    Ok(Image::from_array(output))
}

// ============================================================================
// Color Space
// ============================================================================

/// Target representation, stored with 8-bit scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    /// H in [0, 180) (degrees halved), S and V in [0, 255].
    #[default]
    Hsv,
    /// L scaled to [0, 255], a and b offset by 128.
    Lab,
    /// BT.601 Y, U and V with chroma offset by 128.
    Yuv,
    /// Single-channel luminance.
    Gray,
}

/// Parameters for [`convert_color_space`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ColorSpaceParams {
    pub target: ColorSpace,
}

/// Convert an RGB image into another color representation.
///
/// # Returns
/// 3-channel image holding the target components, or 1 channel for `Gray`
pub fn convert_color_space(image: &Image, params: &ColorSpaceParams) -> Result<Image> {
    if params.target == ColorSpace::Gray {
        return Ok(image.luma_image());
    }
    image.require_rgb("color space conversion")?;

    let input = image.view();
    let target = params.target;
    let mut output = Array3::<u8>::zeros(input.dim());
    Zip::indexed(output.lanes_mut(Axis(2))).par_for_each(|(y, x), mut pixel| {
        let rgb = [input[[y, x, 0]], input[[y, x, 1]], input[[y, x, 2]]];
        for (c, value) in convert_pixel(rgb, target).iter().enumerate() {
            pixel[c] = clamp_u8(*value);
        }
    });

    Ok(Image::from_array(output))
}

fn convert_pixel(rgb: [u8; 3], target: ColorSpace) -> [f32; 3] {
    let [r, g, b] = rgb.map(|v| v as f32);
    match target {
        ColorSpace::Hsv => {
            let (h, s, v) = rgb_to_hsv(r / 255.0, g / 255.0, b / 255.0);
            [h / 2.0, s * 255.0, v * 255.0]
        }
        ColorSpace::Lab => {
            let (l, a, bb) = rgb_to_lab(r / 255.0, g / 255.0, b / 255.0);
            [l * 255.0 / 100.0, a + 128.0, bb + 128.0]
        }
        ColorSpace::Yuv => {
            let y = 0.299 * r + 0.587 * g + 0.114 * b;
            [y, 0.492 * (b - y) + 128.0, 0.877 * (r - y) + 128.0]
        }
        ColorSpace::Gray => {
            let y = 0.299 * r + 0.587 * g + 0.114 * b;
            [y, y, y]
        }
    }
}

// ============================================================================
// Pseudocolor
// ============================================================================

/// Colormap applied to the luminance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    #[default]
    Jet,
    Hot,
    Cool,
    Rainbow,
    /// At least two RGB stops, evenly spaced and linearly interpolated.
    Custom(Vec<[u8; 3]>),
}

impl Colormap {
    /// Color for `t` in [0, 1].
    fn sample(&self, t: f32) -> [f32; 3] {
        let unit = |v: f32| v.clamp(0.0, 1.0) * 255.0;
        match self {
            Colormap::Jet => [
                unit(1.5 - (4.0 * t - 3.0).abs()),
                unit(1.5 - (4.0 * t - 2.0).abs()),
                unit(1.5 - (4.0 * t - 1.0).abs()),
            ],
            Colormap::Hot => [unit(3.0 * t), unit(3.0 * t - 1.0), unit(3.0 * t - 2.0)],
            Colormap::Cool => [unit(t), unit(1.0 - t), 255.0],
            Colormap::Rainbow => {
                let (r, g, b) = hsv_to_rgb((1.0 - t) * 270.0, 1.0, 1.0);
                [unit(r), unit(g), unit(b)]
            }
            Colormap::Custom(stops) if stops.len() < 2 => {
                let only = stops.first().copied().unwrap_or([0, 0, 0]);
                only.map(|v| v as f32)
            }
            Colormap::Custom(stops) => {
                let last = stops.len() - 1;
                let pos = t * last as f32;
                let i = (pos.floor() as usize).min(last - 1);
                let frac = pos - i as f32;
                let (a, b) = (stops[i], stops[i + 1]);
                [0, 1, 2].map(|c| a[c] as f32 + (b[c] as f32 - a[c] as f32) * frac)
            }
        }
    }

    /// 256-entry RGB lookup table.
    pub fn lut(&self) -> [[u8; 3]; 256] {
        let mut lut = [[0u8; 3]; 256];
        for (level, entry) in lut.iter_mut().enumerate() {
            let rgb = self.sample(level as f32 / 255.0);
            *entry = rgb.map(clamp_u8);
        }
        lut
    }
}

/// Parameters for [`pseudocolor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PseudocolorParams {
    pub colormap: Colormap,
}

impl PseudocolorParams {
    pub fn validate(&self) -> Result<()> {
        if let Colormap::Custom(stops) = &self.colormap {
            if stops.len() < 2 {
                return Err(FilterError::invalid(format!(
                    "custom colormap needs at least 2 stops, got {}",
                    stops.len()
                )));
            }
        }
        Ok(())
    }
}

/// Map luminance through a colormap.
///
/// # Returns
/// RGB image of the same size
pub fn pseudocolor(image: &Image, params: &PseudocolorParams) -> Result<Image> {
    params.validate()?;
    let lut = params.colormap.lut();
    let luma = image.to_luma();
    let data = Array3::from_shape_fn((image.height(), image.width(), 3), |(y, x, c)| {
        lut[luma[[y, x]] as usize][c]
    });
    Ok(Image::from_array(data))
}

// ============================================================================
// Color Smoothing
// ============================================================================

/// Parameters for [`color_smoothing`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSmoothingParams {
    /// Odd Gaussian kernel size applied to the chroma planes.
    pub kernel_size: usize,
}

impl Default for ColorSmoothingParams {
    fn default() -> Self {
        Self { kernel_size: 5 }
    }
}

impl ColorSmoothingParams {
    pub fn validate(&self) -> Result<()> {
        ensure_odd_kernel("kernel_size", self.kernel_size, MAX_KERNEL_SIZE)
    }
}

/// Smooth Cb/Cr with a Gaussian, leaving Y untouched.
pub fn color_smoothing(image: &Image, params: &ColorSmoothingParams) -> Result<Image> {
    params.validate()?;
    image.require_rgb("color smoothing")?;
    let kernel = gaussian_kernel_1d(params.kernel_size, 0.0);
    let [y, cb, cr] = rgb_to_ycbcr(image);
    let cb = convolve_separable(cb.view(), &kernel, &kernel);
    let cr = convolve_separable(cr.view(), &kernel, &kernel);
    Ok(ycbcr_to_rgb(&[y, cb, cr]))
}
