//! JPEG-style block transform coding.
//!
//! Each channel is padded by edge replication to a multiple of 8, split into
//! 8x8 blocks, level-shifted by 128 and transformed with the orthonormal
//! DCT-II. Coefficients are divided by the JPEG luminance table scaled for
//! the requested quality, rounded, and written in zig-zag order.
//!
//! Body layout: the quality byte, then every block of channel 0, channel 1,
//! ... in raster order. A block is a list of `(zero run, value)` pairs, the
//! run as a varint and the value as a zig-zag signed varint, closed by a run
//! of 64 (end of block).

use std::f64::consts::PI;
use std::sync::OnceLock;

use ndarray::{s, Array2, ArrayView2};
use log::debug;
use rayon::prelude::*;

use crate::buffer::Image;
use crate::error::{FilterError, Result};
use crate::filters::core::clamp_u8;

use super::{ensure_quality, put_signed_varint, put_varint, ByteReader, Codec, Header};

const BLOCK: usize = 8;
const COEFFS: usize = BLOCK * BLOCK;
const END_OF_BLOCK: u64 = COEFFS as u64;

/// JPEG Annex K luminance quantization table, row-major.
pub const LUMINANCE_TABLE: [u16; COEFFS] = [
    16, 11, 10, 16, 24, 40, 51, 61, //
    12, 12, 14, 19, 26, 58, 60, 55, //
    14, 13, 16, 24, 40, 57, 69, 56, //
    14, 17, 22, 29, 51, 87, 80, 62, //
    18, 22, 37, 56, 68, 109, 103, 77, //
    24, 35, 55, 64, 81, 104, 113, 92, //
    49, 64, 78, 87, 103, 121, 120, 101, //
    72, 92, 95, 98, 112, 100, 103, 99,
];

/// Row-major index of the n-th coefficient in zig-zag order.
pub const ZIGZAG: [usize; COEFFS] = [
    0, 1, 8, 16, 9, 2, 3, 10, //
    17, 24, 32, 25, 18, 11, 4, 5, //
    12, 19, 26, 33, 40, 48, 41, 34, //
    27, 20, 13, 6, 7, 14, 21, 28, //
    35, 42, 49, 56, 57, 50, 43, 36, //
    29, 22, 15, 23, 30, 37, 44, 51, //
    58, 59, 52, 45, 38, 31, 39, 46, //
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Quantization table for `quality` using the IJG scaling rule.
pub fn quant_table(quality: u8) -> [f64; COEFFS] {
    let q = quality.clamp(1, 100) as u32;
    let scale = if q < 50 { 5000 / q } else { 200 - 2 * q };
    let mut table = [1.0; COEFFS];
    for (t, &base) in table.iter_mut().zip(LUMINANCE_TABLE.iter()) {
        *t = ((base as u32 * scale + 50) / 100).clamp(1, 255) as f64;
    }
    table
}

/// Orthonormal DCT-II basis, `basis[[u, x]]`.
fn dct_basis() -> &'static Array2<f64> {
    static BASIS: OnceLock<Array2<f64>> = OnceLock::new();
    BASIS.get_or_init(|| {
        Array2::from_shape_fn((BLOCK, BLOCK), |(u, x)| {
            let alpha = if u == 0 {
                (1.0 / BLOCK as f64).sqrt()
            } else {
                (2.0 / BLOCK as f64).sqrt()
            };
            alpha * (((2 * x + 1) as f64 * u as f64 * PI) / (2 * BLOCK) as f64).cos()
        })
    })
}

/// 2D DCT-II of an 8x8 block.
pub fn forward_dct(block: ArrayView2<f64>) -> Array2<f64> {
    let c = dct_basis();
    c.dot(&block).dot(&c.t())
}

/// Inverse of [`forward_dct`].
pub fn inverse_dct(coeffs: ArrayView2<f64>) -> Array2<f64> {
    let c = dct_basis();
    c.t().dot(&coeffs).dot(c)
}

/// Encode `image`. The stored quality byte may be lower than `quality` when a
/// coarser table reconstructs the image more closely.
pub fn compress(image: &Image, quality: u8) -> Result<Vec<u8>> {
    ensure_quality(quality)?;
    let header = Header::of(image);

    let mut blocks = Vec::new();
    for c in 0..image.channels() {
        blocks.extend(source_blocks(image.channel(c)));
    }

    let effective = effective_quality(&blocks, quality);
    if effective != quality {
        debug!("block DCT quality {quality} encodes with table {effective}");
    }
    let table = quant_table(effective);

    let mut out = header.begin(Codec::BlockDct);
    out.push(effective);
    let quantized: Vec<[i32; COEFFS]> = blocks
        .par_iter()
        .map(|block| quantize(&block.coeffs, &table))
        .collect();
    for block in &quantized {
        write_block(&mut out, block);
    }
    Ok(out)
}

pub fn decompress(stream: &[u8]) -> Result<Image> {
    let (header, mut reader) = Header::parse(stream, Codec::BlockDct)?;
    let quality = reader.u8()?;
    ensure_quality(quality).map_err(|_| FilterError::unsupported(format!("invalid DCT quality {quality}")))?;
    let table = quant_table(quality);

    let (height, width) = (header.height, header.width);
    let (bh, bw) = (height.div_ceil(BLOCK), width.div_ceil(BLOCK));
    let mut planes = Vec::with_capacity(header.channels);

    for _ in 0..header.channels {
        let mut blocks = Vec::new();
        for _ in 0..bh * bw {
            blocks.push(read_block(&mut reader)?);
        }

        let decoded: Vec<Array2<f64>> = blocks
            .par_iter()
            .map(|block| reconstruct(block, &table))
            .collect();

        let mut plane = Array2::<f64>::zeros((bh * BLOCK, bw * BLOCK));
        for (b, pixels) in decoded.iter().enumerate() {
            let (by, bx) = (b / bw, b % bw);
            plane
                .slice_mut(s![by * BLOCK..(by + 1) * BLOCK, bx * BLOCK..(bx + 1) * BLOCK])
                .assign(pixels);
        }
        planes.push(plane);
    }
    reader.finish()?;

    let mut samples = Vec::with_capacity(header.sample_count());
    for y in 0..height {
        for x in 0..width {
            for plane in &planes {
                samples.push(to_sample(plane[[y, x]]));
            }
        }
    }
    header.image(samples)
}

// ============================================================================
// Table Selection
// ============================================================================

/// One 8x8 block of the source: its DCT coefficients and the original samples
/// that lie inside the image.
struct SourceBlock {
    coeffs: Array2<f64>,
    samples: Array2<u8>,
}

impl SourceBlock {
    /// Squared error of the decoded block against the source samples.
    fn squared_error(&self, table: &[f64; COEFFS]) -> u64 {
        let decoded = reconstruct(&quantize(&self.coeffs, table), table);
        let (rows, cols) = self.samples.dim();
        let mut sum = 0u64;
        for y in 0..rows {
            for x in 0..cols {
                let d = to_sample(decoded[[y, x]]) as i64 - self.samples[[y, x]] as i64;
                sum += (d * d) as u64;
            }
        }
        sum
    }
}

/// Blocks of one channel in raster order.
fn source_blocks(channel: ArrayView2<u8>) -> Vec<SourceBlock> {
    let (height, width) = channel.dim();
    let plane = padded_plane(channel);
    let (bh, bw) = (plane.nrows() / BLOCK, plane.ncols() / BLOCK);

    (0..bh * bw)
        .into_par_iter()
        .map(|b| {
            let (y0, x0) = ((b / bw) * BLOCK, (b % bw) * BLOCK);
            let shifted = plane
                .slice(s![y0..y0 + BLOCK, x0..x0 + BLOCK])
                .mapv(|v| v - 128.0);
            let (y1, x1) = ((y0 + BLOCK).min(height), (x0 + BLOCK).min(width));
            SourceBlock {
                coeffs: forward_dct(shifted.view()),
                samples: channel.slice(s![y0..y1, x0..x1]).to_owned(),
            }
        })
        .collect()
}

/// Quality in `1..=quality` whose table decodes `blocks` with the smallest
/// squared error. Ties go to the higher quality.
///
/// Scalar quantization error is not monotone in the step size, so a coarser
/// table can land closer to the source. Taking the minimum over every table
/// up to `quality` makes the error non-increasing in `quality`.
fn effective_quality(blocks: &[SourceBlock], quality: u8) -> u8 {
    let mut best = (u64::MAX, quality);
    for candidate in 1..=quality {
        let table = quant_table(candidate);
        let error: u64 = blocks.par_iter().map(|block| block.squared_error(&table)).sum();
        if error <= best.0 {
            best = (error, candidate);
        }
    }
    best.1
}

// ============================================================================
// Block Helpers
// ============================================================================

/// Level-shifted spatial block decoded from zig-zag coefficients.
fn reconstruct(zigzag: &[i32; COEFFS], table: &[f64; COEFFS]) -> Array2<f64> {
    inverse_dct(dequantize(zigzag, table).view())
}

fn to_sample(value: f64) -> u8 {
    clamp_u8((value + 128.0) as f32)
}

fn padded_plane(channel: ArrayView2<u8>) -> Array2<f64> {
    let (height, width) = channel.dim();
    let ph = height.div_ceil(BLOCK) * BLOCK;
    let pw = width.div_ceil(BLOCK) * BLOCK;
    Array2::from_shape_fn((ph, pw), |(y, x)| {
        channel[[y.min(height - 1), x.min(width - 1)]] as f64
    })
}

/// Quantized coefficients in zig-zag order.
fn quantize(coeffs: &Array2<f64>, table: &[f64; COEFFS]) -> [i32; COEFFS] {
    let mut out = [0i32; COEFFS];
    for (n, &idx) in ZIGZAG.iter().enumerate() {
        let (u, v) = (idx / BLOCK, idx % BLOCK);
        out[n] = (coeffs[[u, v]] / table[idx]).round() as i32;
    }
    out
}

fn dequantize(zigzag: &[i32; COEFFS], table: &[f64; COEFFS]) -> Array2<f64> {
    let mut coeffs = Array2::<f64>::zeros((BLOCK, BLOCK));
    for (n, &idx) in ZIGZAG.iter().enumerate() {
        coeffs[[idx / BLOCK, idx % BLOCK]] = zigzag[n] as f64 * table[idx];
    }
    coeffs
}

fn write_block(out: &mut Vec<u8>, zigzag: &[i32; COEFFS]) {
    let mut run = 0u64;
    for &value in zigzag {
        if value == 0 {
            run += 1;
        } else {
            put_varint(out, run);
            put_signed_varint(out, value as i64);
            run = 0;
        }
    }
    put_varint(out, END_OF_BLOCK);
}

fn read_block(reader: &mut ByteReader<'_>) -> Result<[i32; COEFFS]> {
    let mut zigzag = [0i32; COEFFS];
    let mut pos = 0usize;
    loop {
        let run = reader.varint()?;
        if run == END_OF_BLOCK {
            return Ok(zigzag);
        }
        if run > END_OF_BLOCK || pos + run as usize >= COEFFS {
            return Err(FilterError::unsupported("DCT block overruns 64 coefficients"));
        }
        pos += run as usize;
        let value = reader.signed_varint()?;
        zigzag[pos] = i32::try_from(value)
            .map_err(|_| FilterError::unsupported("DCT coefficient out of range"))?;
        pos += 1;
    }
}
