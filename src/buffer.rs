//! Canonical in-memory image representation.
//!
//! An [`Image`] is an `(height, width, channels)` array of `u8` samples with
//! 1 (grayscale) or 3 (RGB) channels. Operators take `&Image` and always
//! return a freshly allocated result.

use std::io::Cursor;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

pub use image::ImageFormat;

use crate::error::{FilterError, Result};

/// Rec. 601 luma coefficients used for every single-channel view.
pub const LUMA_R: f32 = 0.299;
pub const LUMA_G: f32 = 0.587;
pub const LUMA_B: f32 = 0.114;

/// Luminance of one RGB sample, rounded to nearest.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let y = LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// Grayscale or RGB 8-bit raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Array3<u8>,
}

impl Image {
    /// Wrap an `(height, width, channels)` array, checking the invariants.
    pub fn new(data: Array3<u8>) -> Result<Self> {
        let (height, width, channels) = data.dim();
        check_layout(width, height, channels)?;
        Ok(Image { data })
    }

    /// Build from interleaved row-major samples.
    pub fn from_raw(width: usize, height: usize, channels: usize, samples: Vec<u8>) -> Result<Self> {
        check_layout(width, height, channels)?;
        let data = Array3::from_shape_vec((height, width, channels), samples).map_err(|e| {
            FilterError::invalid(format!(
                "sample buffer does not match {width}x{height}x{channels}: {e}"
            ))
        })?;
        Ok(Image { data })
    }

    /// Image with every sample set to `value`.
    pub fn filled(width: usize, height: usize, channels: usize, value: u8) -> Result<Self> {
        check_layout(width, height, channels)?;
        Ok(Image {
            data: Array3::from_elem((height, width, channels), value),
        })
    }

    /// Image whose sample at `(y, x, c)` is `f(y, x, c)`.
    pub fn from_fn<F>(width: usize, height: usize, channels: usize, f: F) -> Result<Self>
    where
        F: Fn(usize, usize, usize) -> u8,
    {
        check_layout(width, height, channels)?;
        Ok(Image {
            data: Array3::from_shape_fn((height, width, channels), |(y, x, c)| f(y, x, c)),
        })
    }

    /// Build a 1-channel image from a plane.
    pub fn from_plane(plane: Array2<u8>) -> Result<Self> {
        Image::new(plane.insert_axis(Axis(2)))
    }

    /// Internal constructor for arrays whose shape is derived from a valid image.
    pub(crate) fn from_array(data: Array3<u8>) -> Self {
        debug_assert!(check_layout(data.dim().1, data.dim().0, data.dim().2).is_ok());
        Image { data }
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    pub fn is_gray(&self) -> bool {
        self.channels() == 1
    }

    pub fn pixel_count(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, c: usize) -> u8 {
        self.data[[y, x, c]]
    }

    pub fn view(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    pub fn as_array(&self) -> &Array3<u8> {
        &self.data
    }

    pub fn into_array(self) -> Array3<u8> {
        self.data
    }

    /// View of one channel.
    pub fn channel(&self, c: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(2), c)
    }

    /// Interleaved row-major samples.
    pub fn to_raw(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    /// Apply `f` to every sample.
    pub fn map_samples<F>(&self, f: F) -> Image
    where
        F: Fn(u8) -> u8,
    {
        Image::from_array(self.data.mapv(f))
    }

    /// Single-channel luminance plane. Grayscale images are copied as-is.
    pub fn to_luma(&self) -> Array2<u8> {
        if self.is_gray() {
            return self.channel(0).to_owned();
        }
        Array2::from_shape_fn((self.height(), self.width()), |(y, x)| {
            luminance(self.data[[y, x, 0]], self.data[[y, x, 1]], self.data[[y, x, 2]])
        })
    }

    /// Luminance as a 1-channel image.
    pub fn luma_image(&self) -> Image {
        Image::from_array(self.to_luma().insert_axis(Axis(2)))
    }

    /// Expand a grayscale image to RGB by replicating the channel.
    pub fn to_rgb(&self) -> Image {
        if !self.is_gray() {
            return self.clone();
        }
        let plane = self.channel(0);
        Image::from_array(Array3::from_shape_fn(
            (self.height(), self.width(), 3),
            |(y, x, _)| plane[[y, x]],
        ))
    }

    /// Fail with `UnsupportedFormat` unless the image is RGB.
    pub(crate) fn require_rgb(&self, operation: &str) -> Result<()> {
        if self.channels() != 3 {
            return Err(FilterError::unsupported(format!(
                "{operation} requires a 3-channel RGB image, got {} channel(s)",
                self.channels()
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Decode / Encode
    // ========================================================================

    /// Decode PNG, JPEG, BMP, TIFF or GIF bytes.
    ///
    /// Alpha is dropped and deeper bit depths are narrowed to 8 bits, so the
    /// result is always grayscale or RGB.
    pub fn decode(bytes: &[u8]) -> Result<Image> {
        let dynamic = image::load_from_memory(bytes)?;
        let (width, height) = (dynamic.width() as usize, dynamic.height() as usize);

        if dynamic.color().has_color() {
            let rgb = dynamic.to_rgb8();
            Image::from_raw(width, height, 3, rgb.into_raw())
        } else {
            let luma = dynamic.to_luma8();
            Image::from_raw(width, height, 1, luma.into_raw())
        }
    }

    /// Encode into the given container format.
    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>> {
        let (width, height) = (self.width() as u32, self.height() as u32);
        let mut out = Cursor::new(Vec::new());

        if self.is_gray() {
            let buffer = image::GrayImage::from_raw(width, height, self.to_raw())
                .ok_or_else(|| FilterError::InternalFailure("gray buffer size mismatch".into()))?;
            buffer.write_to(&mut out, format)?;
        } else {
            let buffer = image::RgbImage::from_raw(width, height, self.to_raw())
                .ok_or_else(|| FilterError::InternalFailure("rgb buffer size mismatch".into()))?;
            buffer.write_to(&mut out, format)?;
        }

        Ok(out.into_inner())
    }
}

fn check_layout(width: usize, height: usize, channels: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(FilterError::invalid(format!(
            "image dimensions must be positive, got {width}x{height}"
        )));
    }
    if channels != 1 && channels != 3 {
        return Err(FilterError::unsupported(format!(
            "images must have 1 or 3 channels, got {channels}"
        )));
    }
    Ok(())
}
