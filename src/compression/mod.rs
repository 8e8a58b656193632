//! Compression codecs with a shared stream container.
//!
//! Every stream starts with the same 13-byte header:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic (`RLE1`, `HUF1`, `DCT1`, `WAV1`) |
//! | 4 | 4 | Width, u32 little-endian |
//! | 8 | 4 | Height, u32 little-endian |
//! | 12 | 1 | Channel count |
//!
//! The codec-specific body follows. [`decompress`] picks the decoder from the
//! magic, so callers only need to keep the bytes.
//!
//! ## Codecs
//!
//! - **RLE** - Run-length pairs over interleaved samples (lossless)
//! - **Huffman** - Canonical prefix code over sample values (lossless)
//! - **Block DCT** - 8x8 JPEG-style transform coding (lossy)
//! - **Wavelet** - Thresholded Haar coefficients (lossy)

pub mod block_dct;
pub mod huffman;
pub mod rle;
pub mod wavelet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::buffer::Image;
use crate::error::{ensure_range, FilterError, Result};

/// Size of the common stream header in bytes.
pub const HEADER_LEN: usize = 13;

/// Upper bound on `width * height * channels` accepted from a stream header.
const MAX_SAMPLES: usize = 1 << 30;

/// Available codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Rle,
    Huffman,
    #[serde(alias = "jpeg")]
    BlockDct,
    Wavelet,
}

impl Codec {
    /// Four-byte tag that opens every stream of this codec.
    pub fn magic(self) -> [u8; 4] {
        match self {
            Codec::Rle => *b"RLE1",
            Codec::Huffman => *b"HUF1",
            Codec::BlockDct => *b"DCT1",
            Codec::Wavelet => *b"WAV1",
        }
    }

    pub fn from_magic(magic: &[u8]) -> Option<Codec> {
        [Codec::Rle, Codec::Huffman, Codec::BlockDct, Codec::Wavelet]
            .into_iter()
            .find(|codec| codec.magic() == magic)
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, Codec::Rle | Codec::Huffman)
    }
}

impl std::str::FromStr for Codec {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rle" => Ok(Codec::Rle),
            "huffman" => Ok(Codec::Huffman),
            "block_dct" | "dct" | "jpeg" => Ok(Codec::BlockDct),
            "wavelet" => Ok(Codec::Wavelet),
            other => Err(FilterError::invalid(format!("unknown codec '{other}'"))),
        }
    }
}

/// Parameters for the compress operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressParams {
    pub codec: Codec,
    /// Quality in [1, 100]; ignored by the lossless codecs.
    pub quality: u8,
    /// Wavelet decomposition depth in [1, 6]; only read by the wavelet codec.
    pub levels: usize,
}

impl Default for CompressParams {
    fn default() -> Self {
        Self {
            codec: Codec::BlockDct,
            quality: 75,
            levels: wavelet::DEFAULT_LEVELS,
        }
    }
}

impl CompressParams {
    pub fn validate(&self) -> Result<()> {
        ensure_quality(self.quality)?;
        ensure_range("levels", self.levels, 1, wavelet::MAX_LEVELS)
    }
}

pub(crate) fn ensure_quality(quality: u8) -> Result<()> {
    ensure_range("quality", quality, 1, 100)
}

/// Compress with the given codec and quality.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `codec` - Stream format
/// * `quality` - 1 (smallest) to 100 (best); ignored by lossless codecs
///
/// # Returns
/// Self-describing byte stream
pub fn compress(image: &Image, codec: Codec, quality: u8) -> Result<Vec<u8>> {
    compress_with(
        image,
        &CompressParams {
            codec,
            quality,
            ..CompressParams::default()
        },
    )
}

/// Compress using every field of `params`.
pub fn compress_with(image: &Image, params: &CompressParams) -> Result<Vec<u8>> {
    params.validate()?;
    let stream = match params.codec {
        Codec::Rle => rle::compress(image),
        Codec::Huffman => huffman::compress(image),
        Codec::BlockDct => block_dct::compress(image, params.quality)?,
        Codec::Wavelet => wavelet::compress_with_levels(image, params.quality, params.levels)?,
    };
    debug!(
        "compress: {:?} q={} {} -> {} bytes (ratio {:.2})",
        params.codec,
        params.quality,
        image.pixel_count() * image.channels(),
        stream.len(),
        compression_ratio(image, &stream)
    );
    Ok(stream)
}

/// Decode any stream produced by [`compress`].
pub fn decompress(stream: &[u8]) -> Result<Image> {
    let magic = stream
        .get(..4)
        .ok_or_else(|| FilterError::unsupported("stream shorter than its magic"))?;
    let codec = Codec::from_magic(magic)
        .ok_or_else(|| FilterError::unsupported(format!("unknown stream magic {magic:?}")))?;
    match codec {
        Codec::Rle => rle::decompress(stream),
        Codec::Huffman => huffman::decompress(stream),
        Codec::BlockDct => block_dct::decompress(stream),
        Codec::Wavelet => wavelet::decompress(stream),
    }
}

/// Raw sample bytes divided by stream bytes.
pub fn compression_ratio(image: &Image, stream: &[u8]) -> f64 {
    let raw = image.pixel_count() * image.channels();
    raw as f64 / stream.len().max(1) as f64
}

// ============================================================================
// Container
// ============================================================================

/// Image geometry carried in every stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl Header {
    pub fn of(image: &Image) -> Self {
        Header {
            width: image.width(),
            height: image.height(),
            channels: image.channels(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.width * self.height * self.channels
    }

    /// Start a stream with `codec`'s magic and this header.
    pub fn begin(&self, codec: Codec) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.sample_count() / 2);
        out.extend_from_slice(&codec.magic());
        out.extend_from_slice(&(self.width as u32).to_le_bytes());
        out.extend_from_slice(&(self.height as u32).to_le_bytes());
        out.push(self.channels as u8);
        out
    }

    /// Parse the header of a `codec` stream and return a reader over its body.
    pub fn parse(stream: &[u8], codec: Codec) -> Result<(Header, ByteReader<'_>)> {
        let mut reader = ByteReader::new(stream);
        let magic = reader.take(4)?;
        if magic != codec.magic() {
            return Err(FilterError::unsupported(format!(
                "expected {:?} stream, found magic {magic:?}",
                codec
            )));
        }
        let width = reader.u32()? as usize;
        let height = reader.u32()? as usize;
        let channels = reader.u8()? as usize;

        if width == 0 || height == 0 || !(channels == 1 || channels == 3) {
            return Err(FilterError::unsupported(format!(
                "invalid stream geometry {width}x{height}x{channels}"
            )));
        }
        width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .filter(|&n| n <= MAX_SAMPLES)
            .ok_or_else(|| FilterError::unsupported("stream geometry too large"))?;

        Ok((
            Header {
                width,
                height,
                channels,
            },
            reader,
        ))
    }

    /// Build the decoded image from interleaved samples.
    pub fn image(&self, samples: Vec<u8>) -> Result<Image> {
        Image::from_raw(self.width, self.height, self.channels, samples)
            .map_err(|e| FilterError::unsupported(format!("decoded samples do not fit header: {e}")))
    }
}

/// Bounds-checked cursor over a stream body.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(FilterError::unsupported("truncated stream"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(f32::from_le_bytes(buf))
    }

    /// LEB128 unsigned varint.
    pub fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            if shift >= 64 {
                return Err(FilterError::unsupported("varint overflow"));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Zig-zag mapped signed varint.
    pub fn signed_varint(&mut self) -> Result<i64> {
        let v = self.varint()?;
        Ok((v >> 1) as i64 ^ -((v & 1) as i64))
    }

    /// Fail unless the whole body was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(FilterError::unsupported(format!(
                "{} trailing bytes after stream body",
                self.remaining()
            )));
        }
        Ok(())
    }
}

pub(crate) fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn put_signed_varint(out: &mut Vec<u8>, value: i64) {
    put_varint(out, ((value << 1) ^ (value >> 63)) as u64);
}
