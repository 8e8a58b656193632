//! Wavelet coefficient thresholding codec.
//!
//! Each channel is edge-padded to a multiple of `2^levels`, decomposed with
//! the orthonormal Haar transform and hard-thresholded: detail coefficients
//! with magnitude below `(100 - quality) * 0.5` are dropped. The coarsest
//! approximation band is always kept.
//!
//! Body layout: levels (u8), quality (u8), then per channel the approximation
//! band as dense f32 LE values in raster order, the number of stored detail
//! coefficients (varint) and `(index gap, value)` entries, the gap as a varint
//! from the previous index + 1 and the value as f32 LE. The dense band bounds
//! the decoded plane by the stream length.

use ndarray::{s, Array2};

use crate::buffer::Image;
use crate::error::{ensure_range, FilterError, Result};
use crate::filters::core::clamp_u8;
use crate::filters::wavelet::{decompose_2d, pad_to_multiple, reconstruct_2d, Wavelet, WaveletFamily};

use super::{ensure_quality, put_varint, Codec, Header};

pub const DEFAULT_LEVELS: usize = 3;
pub const MAX_LEVELS: usize = 6;

/// Detail magnitude below which coefficients are discarded.
pub fn threshold_for(quality: u8) -> f64 {
    (100.0 - quality as f64) * 0.5
}

pub fn compress(image: &Image, quality: u8) -> Result<Vec<u8>> {
    compress_with_levels(image, quality, DEFAULT_LEVELS)
}

pub fn compress_with_levels(image: &Image, quality: u8, levels: usize) -> Result<Vec<u8>> {
    ensure_quality(quality)?;
    ensure_range("levels", levels, 1, MAX_LEVELS)?;

    let wavelet = Wavelet::new(WaveletFamily::Haar);
    let threshold = threshold_for(quality);
    let mut out = Header::of(image).begin(Codec::Wavelet);
    out.push(levels as u8);
    out.push(quality);

    for c in 0..image.channels() {
        let plane = image.channel(c).mapv(|v| v as f64);
        let mut coeffs = pad_to_multiple(&plane, 1 << levels);
        decompose_2d(&mut coeffs, &wavelet, levels);

        let (ph, pw) = coeffs.dim();
        let (ah, aw) = (ph >> levels, pw >> levels);
        for &v in coeffs.slice(s![..ah, ..aw]).iter() {
            out.extend_from_slice(&(v as f32).to_le_bytes());
        }

        let kept: Vec<(usize, f32)> = coeffs
            .indexed_iter()
            .filter(|&((y, x), &v)| !(y < ah && x < aw) && v != 0.0 && v.abs() >= threshold)
            .map(|((y, x), &v)| (y * pw + x, v as f32))
            .collect();

        put_varint(&mut out, kept.len() as u64);
        let mut next = 0usize;
        for (index, value) in kept {
            put_varint(&mut out, (index - next) as u64);
            out.extend_from_slice(&value.to_le_bytes());
            next = index + 1;
        }
    }
    Ok(out)
}

pub fn decompress(stream: &[u8]) -> Result<Image> {
    let (header, mut reader) = Header::parse(stream, Codec::Wavelet)?;
    let levels = reader.u8()? as usize;
    if !(1..=MAX_LEVELS).contains(&levels) {
        return Err(FilterError::unsupported(format!("invalid wavelet depth {levels}")));
    }
    let quality = reader.u8()?;
    ensure_quality(quality)
        .map_err(|_| FilterError::unsupported(format!("invalid wavelet quality {quality}")))?;

    let multiple = 1usize << levels;
    let ph = header.height.div_ceil(multiple) * multiple;
    let pw = header.width.div_ceil(multiple) * multiple;
    let total = ph * pw;
    let (ah, aw) = (ph >> levels, pw >> levels);
    let band_bytes = ah * aw * 4 * header.channels;
    if reader.remaining() < band_bytes {
        return Err(FilterError::unsupported(format!(
            "wavelet body holds {} bytes, approximation bands need {band_bytes}",
            reader.remaining()
        )));
    }
    let wavelet = Wavelet::new(WaveletFamily::Haar);

    let mut planes = Vec::with_capacity(header.channels);
    for _ in 0..header.channels {
        let mut coeffs = Array2::<f64>::zeros((ph, pw));
        for v in coeffs.slice_mut(s![..ah, ..aw]).iter_mut() {
            *v = reader.f32()? as f64;
        }

        let count = reader.varint()?;
        if count > total as u64 {
            return Err(FilterError::unsupported("more wavelet coefficients than pixels"));
        }
        let mut next = 0usize;
        for _ in 0..count {
            let gap = reader.varint()?;
            let index = next
                .checked_add(usize::try_from(gap).unwrap_or(usize::MAX))
                .filter(|&i| i < total)
                .ok_or_else(|| FilterError::unsupported("wavelet coefficient index out of range"))?;
            coeffs[[index / pw, index % pw]] = reader.f32()? as f64;
            next = index + 1;
        }
        reconstruct_2d(&mut coeffs, &wavelet, levels);
        planes.push(coeffs.slice(s![..header.height, ..header.width]).to_owned());
    }
    reader.finish()?;

    let mut samples = Vec::with_capacity(header.sample_count());
    for y in 0..header.height {
        for x in 0..header.width {
            for plane in &planes {
                samples.push(clamp_u8(plane[[y, x]] as f32));
            }
        }
    }
    header.image(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mse(a: &Image, b: &Image) -> f64 {
        let sum: f64 = a
            .as_array()
            .iter()
            .zip(b.as_array().iter())
            .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
            .sum();
        sum / a.as_array().len() as f64
    }

    fn textured() -> Image {
        Image::from_fn(32, 32, 3, |y, x, c| {
            let v = 120.0 + 50.0 * ((x as f64) * 0.5 + c as f64).sin() + 30.0 * ((y as f64) * 0.3).cos();
            v.round() as u8
        })
        .unwrap()
    }

    #[test]
    fn test_threshold_formula() {
        assert_eq!(threshold_for(100), 0.0);
        assert_eq!(threshold_for(1), 49.5);
        assert_eq!(threshold_for(60), 20.0);
    }

    #[test]
    fn test_full_quality_is_exact() {
        let img = textured();
        let decoded = decompress(&compress(&img, 100).unwrap()).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_error_decreases_with_quality() {
        let img = textured();
        let errors: Vec<f64> = [5u8, 40, 80, 100]
            .iter()
            .map(|&q| mse(&img, &decompress(&compress(&img, q).unwrap()).unwrap()))
            .collect();
        for pair in errors.windows(2) {
            assert!(pair[0] >= pair[1], "{errors:?}");
        }
    }

    #[test]
    fn test_low_quality_is_smaller() {
        let img = textured();
        let small = compress(&img, 10).unwrap();
        let large = compress(&img, 95).unwrap();
        assert!(small.len() < large.len());
    }

    #[test]
    fn test_oversized_header_is_rejected_before_decoding() {
        // 8192x8192 gray, depth 3, quality 50, no coefficients at all
        let mut stream = b"WAV1".to_vec();
        stream.extend_from_slice(&8192u32.to_le_bytes());
        stream.extend_from_slice(&8192u32.to_le_bytes());
        stream.extend_from_slice(&[1, 3, 50, 0]);
        assert!(matches!(decompress(&stream), Err(FilterError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_black_image_keeps_dense_band() {
        let img = Image::filled(16, 16, 1, 0).unwrap();
        let stream = compress(&img, 50).unwrap();
        // levels, quality, 2x2 band of f32, zero detail count
        assert_eq!(stream.len(), crate::compression::HEADER_LEN + 2 + 16 + 1);
        assert_eq!(decompress(&stream).unwrap(), img);
    }

    #[test]
    fn test_odd_size_and_depth() {
        let img = Image::from_fn(21, 10, 1, |y, x, _| (x * 12 + y * 5) as u8).unwrap();
        for levels in [1, 4, 6] {
            let stream = compress_with_levels(&img, 90, levels).unwrap();
            let decoded = decompress(&stream).unwrap();
            assert_eq!(decoded.as_array().dim(), (10, 21, 1));
        }
        assert!(compress_with_levels(&img, 90, 0).is_err());
        assert!(compress_with_levels(&img, 90, 7).is_err());
    }
}
