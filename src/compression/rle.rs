//! Run-length encoding of interleaved samples.
//!
//! The body is a sequence of `(count, value)` byte pairs with `count` in
//! [1, 255]; longer runs are split. Runs cross row and channel boundaries
//! because the samples are taken in storage order.

use crate::buffer::Image;
use crate::error::{FilterError, Result};

use super::{Codec, Header};

const MAX_RUN: usize = 255;

pub fn compress(image: &Image) -> Vec<u8> {
    let mut out = Header::of(image).begin(Codec::Rle);
    let samples = image.as_array().iter();

    let mut current: Option<(u8, usize)> = None;
    for &value in samples {
        current = match current {
            Some((v, run)) if v == value && run < MAX_RUN => Some((v, run + 1)),
            Some((v, run)) => {
                out.push(run as u8);
                out.push(v);
                Some((value, 1))
            }
            None => Some((value, 1)),
        };
    }
    if let Some((v, run)) = current {
        out.push(run as u8);
        out.push(v);
    }
    out
}

pub fn decompress(stream: &[u8]) -> Result<Image> {
    let (header, reader) = Header::parse(stream, Codec::Rle)?;
    let body = reader.rest();
    if body.len() % 2 != 0 {
        return Err(FilterError::unsupported("RLE body has an unpaired byte"));
    }

    let expected = header.sample_count();
    if body.len() / 2 * MAX_RUN < expected {
        return Err(FilterError::unsupported(format!(
            "RLE body of {} bytes cannot hold {expected} samples",
            body.len()
        )));
    }
    let mut samples = Vec::with_capacity(expected);
    for pair in body.chunks_exact(2) {
        let (count, value) = (pair[0] as usize, pair[1]);
        if count == 0 {
            return Err(FilterError::unsupported("RLE run of length zero"));
        }
        if samples.len() + count > expected {
            return Err(FilterError::unsupported("RLE runs exceed the image size"));
        }
        samples.resize(samples.len() + count, value);
    }
    if samples.len() != expected {
        return Err(FilterError::unsupported(format!(
            "RLE stream holds {} of {} samples",
            samples.len(),
            expected
        )));
    }
    header.image(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::HEADER_LEN;

    #[test]
    fn test_white_block_is_one_run() {
        let img = Image::filled(8, 8, 1, 255).unwrap();
        let stream = compress(&img);
        assert_eq!(stream.len(), HEADER_LEN + 2);
        assert_eq!(&stream[HEADER_LEN..], &[64, 255]);
        assert_eq!(decompress(&stream).unwrap(), img);
    }

    #[test]
    fn test_long_runs_are_split() {
        let img = Image::filled(20, 20, 1, 7).unwrap();
        let stream = compress(&img);
        // 400 = 255 + 145
        assert_eq!(&stream[HEADER_LEN..], &[255, 7, 145, 7]);
        assert_eq!(decompress(&stream).unwrap(), img);
    }

    #[test]
    fn test_noisy_rgb_round_trip() {
        let img = Image::from_fn(17, 9, 3, |y, x, c| ((x * 37 + y * 101 + c * 13) % 256) as u8).unwrap();
        assert_eq!(decompress(&compress(&img)).unwrap(), img);
    }

    #[test]
    fn test_rejects_zero_run_and_overflow() {
        let img = Image::filled(2, 2, 1, 9).unwrap();
        let mut stream = compress(&img);
        stream[HEADER_LEN] = 0;
        assert!(decompress(&stream).is_err());

        let mut stream = compress(&img);
        stream[HEADER_LEN] = 5;
        assert!(decompress(&stream).is_err());
    }

    #[test]
    fn test_rejects_header_larger_than_body() {
        let mut stream = b"RLE1".to_vec();
        stream.extend_from_slice(&8192u32.to_le_bytes());
        stream.extend_from_slice(&8192u32.to_le_bytes());
        stream.extend_from_slice(&[1, 255, 0]);
        assert!(matches!(decompress(&stream), Err(FilterError::UnsupportedFormat(_))));
    }
}
