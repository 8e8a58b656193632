//! Canonical Huffman coding of sample values.
//!
//! Body layout: 256 code lengths (one byte per symbol, 0 = unused), the
//! sample count as u64 little-endian, then the codes packed MSB-first with
//! the last byte zero-padded. Only lengths are stored; both sides derive the
//! same canonical codes by ordering symbols on `(length, symbol)`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::buffer::Image;
use crate::error::{FilterError, Result};
use crate::filters::core::histogram;

use super::{Codec, Header};

const SYMBOLS: usize = 256;
const MAX_CODE_LEN: usize = 64;

pub fn compress(image: &Image) -> Vec<u8> {
    let header = Header::of(image);
    let mut out = header.begin(Codec::Huffman);

    let mut freq = [0u64; SYMBOLS];
    for c in 0..image.channels() {
        let h = histogram(image.channel(c));
        for (f, n) in freq.iter_mut().zip(h.iter()) {
            *f += n;
        }
    }

    let lengths = code_lengths(&freq);
    let codes = canonical_codes(&lengths);
    out.extend(lengths.iter().map(|&l| l as u8));
    out.extend_from_slice(&(header.sample_count() as u64).to_le_bytes());

    let mut writer = BitWriter::new(out);
    for &value in image.as_array().iter() {
        let (code, len) = codes[value as usize];
        writer.write(code, len);
    }
    writer.finish()
}

pub fn decompress(stream: &[u8]) -> Result<Image> {
    let (header, mut reader) = Header::parse(stream, Codec::Huffman)?;
    let mut lengths = [0usize; SYMBOLS];
    for (len, &byte) in lengths.iter_mut().zip(reader.take(SYMBOLS)?) {
        *len = byte as usize;
    }
    let count = reader.u64()?;
    if count != header.sample_count() as u64 {
        return Err(FilterError::unsupported(format!(
            "Huffman sample count {count} does not match header ({})",
            header.sample_count()
        )));
    }

    if (reader.remaining() as u64).saturating_mul(8) < count {
        return Err(FilterError::unsupported(format!(
            "Huffman bitstream of {} bytes cannot hold {count} samples",
            reader.remaining()
        )));
    }

    let decoder = Decoder::new(&lengths)?;
    let mut bits = BitReader::new(reader.rest());
    let mut samples = Vec::with_capacity(header.sample_count());
    for _ in 0..header.sample_count() {
        samples.push(decoder.next_symbol(&mut bits)?);
    }
    if bits.remaining_bytes() != 0 {
        return Err(FilterError::unsupported("trailing bytes after Huffman bitstream"));
    }
    header.image(samples)
}

// ============================================================================
// Code Construction
// ============================================================================

/// Huffman code lengths for the given symbol frequencies.
///
/// Ties are broken by node creation order so the result is deterministic.
/// A lone symbol gets a one-bit code.
pub(crate) fn code_lengths(freq: &[u64; SYMBOLS]) -> [usize; SYMBOLS] {
    let mut lengths = [0usize; SYMBOLS];
    let used: Vec<usize> = (0..SYMBOLS).filter(|&s| freq[s] > 0).collect();
    match used.len() {
        0 => return lengths,
        1 => {
            lengths[used[0]] = 1;
            return lengths;
        }
        _ => {}
    }

    // Nodes 0..256 are leaves, later ones internal; parent[n] links upwards.
    let mut parent: Vec<usize> = vec![usize::MAX; SYMBOLS];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        used.iter().map(|&s| Reverse((freq[s], s))).collect();
    while heap.len() > 1 {
        let (Some(Reverse((wa, a))), Some(Reverse((wb, b)))) = (heap.pop(), heap.pop()) else {
            break;
        };
        let node = parent.len();
        parent.push(usize::MAX);
        parent[a] = node;
        parent[b] = node;
        heap.push(Reverse((wa + wb, node)));
    }

    for &s in &used {
        let mut depth = 0;
        let mut n = s;
        while parent[n] != usize::MAX {
            n = parent[n];
            depth += 1;
        }
        lengths[s] = depth;
    }
    lengths
}

/// Symbols ordered by `(length, symbol)`, skipping unused ones.
fn canonical_order(lengths: &[usize; SYMBOLS]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..SYMBOLS).filter(|&s| lengths[s] > 0).collect();
    order.sort_by_key(|&s| (lengths[s], s));
    order
}

/// `(code, length)` per symbol.
pub(crate) fn canonical_codes(lengths: &[usize; SYMBOLS]) -> [(u64, usize); SYMBOLS] {
    let mut codes = [(0u64, 0usize); SYMBOLS];
    let mut code = 0u64;
    let mut prev_len = 0;
    for s in canonical_order(lengths) {
        let len = lengths[s];
        if prev_len > 0 {
            code = (code + 1) << (len - prev_len);
        }
        codes[s] = (code, len);
        prev_len = len;
    }
    codes
}

/// Canonical decoding tables indexed by code length.
struct Decoder {
    symbols: Vec<u8>,
    first_code: [u64; MAX_CODE_LEN + 1],
    first_index: [usize; MAX_CODE_LEN + 1],
    count: [usize; MAX_CODE_LEN + 1],
    max_len: usize,
}

impl Decoder {
    fn new(lengths: &[usize; SYMBOLS]) -> Result<Decoder> {
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        if max_len == 0 {
            return Err(FilterError::unsupported("Huffman table has no symbols"));
        }
        if max_len > MAX_CODE_LEN {
            return Err(FilterError::unsupported(format!(
                "Huffman code length {max_len} exceeds {MAX_CODE_LEN}"
            )));
        }

        let mut count = [0usize; MAX_CODE_LEN + 1];
        for &l in lengths.iter().filter(|&&l| l > 0) {
            count[l] += 1;
        }
        // Kraft inequality: the lengths must describe a prefix code.
        let kraft: u128 = (1..=max_len)
            .map(|l| (count[l] as u128) << (max_len - l))
            .sum();
        if kraft > 1u128 << max_len {
            return Err(FilterError::unsupported("Huffman code lengths are oversubscribed"));
        }

        let mut first_code = [0u64; MAX_CODE_LEN + 1];
        let mut first_index = [0usize; MAX_CODE_LEN + 1];
        let mut code = 0u64;
        let mut index = 0usize;
        for l in 1..=max_len {
            first_code[l] = code;
            first_index[l] = index;
            code = (code + count[l] as u64) << 1;
            index += count[l];
        }

        let symbols = canonical_order(lengths).into_iter().map(|s| s as u8).collect();
        Ok(Decoder {
            symbols,
            first_code,
            first_index,
            count,
            max_len,
        })
    }

    fn next_symbol(&self, bits: &mut BitReader<'_>) -> Result<u8> {
        let mut code = 0u64;
        for len in 1..=self.max_len {
            code = (code << 1) | bits.next_bit()? as u64;
            let offset = code.wrapping_sub(self.first_code[len]);
            if code >= self.first_code[len] && offset < self.count[len] as u64 {
                return Ok(self.symbols[self.first_index[len] + offset as usize]);
            }
        }
        Err(FilterError::unsupported("invalid Huffman code in stream"))
    }
}

// ============================================================================
// Bit I/O
// ============================================================================

struct BitWriter {
    out: Vec<u8>,
    acc: u8,
    filled: u32,
}

impl BitWriter {
    fn new(out: Vec<u8>) -> Self {
        BitWriter {
            out,
            acc: 0,
            filled: 0,
        }
    }

    fn write(&mut self, code: u64, len: usize) {
        for i in (0..len).rev() {
            self.acc = (self.acc << 1) | ((code >> i) & 1) as u8;
            self.filled += 1;
            if self.filled == 8 {
                self.out.push(self.acc);
                self.acc = 0;
                self.filled = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.out.push(self.acc << (8 - self.filled));
        }
        self.out
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BitReader { bytes, pos: 0 }
    }

    fn next_bit(&mut self) -> Result<u8> {
        let byte = self
            .bytes
            .get(self.pos / 8)
            .ok_or_else(|| FilterError::unsupported("truncated Huffman bitstream"))?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit)
    }

    /// Whole bytes left after the current (possibly partial) byte.
    fn remaining_bytes(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos.div_ceil(8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::HEADER_LEN;

    fn frequencies(pairs: &[(usize, u64)]) -> [u64; SYMBOLS] {
        let mut freq = [0u64; SYMBOLS];
        for &(s, f) in pairs {
            freq[s] = f;
        }
        freq
    }

    #[test]
    fn test_code_lengths_textbook() {
        // a:45 b:13 c:12 d:16 e:9 f:5
        let freq = frequencies(&[(0, 45), (1, 13), (2, 12), (3, 16), (4, 9), (5, 5)]);
        let lengths = code_lengths(&freq);
        assert_eq!(&lengths[..6], &[1, 3, 3, 3, 4, 4]);
    }

    #[test]
    fn test_canonical_codes_are_prefix_free() {
        let freq = frequencies(&[(10, 100), (20, 40), (30, 30), (40, 20), (50, 5), (60, 1)]);
        let lengths = code_lengths(&freq);
        let codes = canonical_codes(&lengths);
        let used: Vec<(u64, usize)> = (0..SYMBOLS).filter(|&s| lengths[s] > 0).map(|s| codes[s]).collect();
        for (i, &(ca, la)) in used.iter().enumerate() {
            for &(cb, lb) in used.iter().skip(i + 1) {
                let l = la.min(lb);
                assert_ne!(ca >> (la - l), cb >> (lb - l), "prefix collision");
            }
        }
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let img = Image::from_fn(23, 11, 3, |y, x, c| ((x * x + y * 3 + c * 50) % 256) as u8).unwrap();
        let stream = compress(&img);
        assert_eq!(decompress(&stream).unwrap(), img);
    }

    #[test]
    fn test_single_symbol_image() {
        let img = Image::filled(8, 8, 1, 200).unwrap();
        let stream = compress(&img);
        // 64 one-bit codes = 8 bytes of bitstream
        assert_eq!(stream.len(), HEADER_LEN + SYMBOLS + 8 + 8);
        assert_eq!(decompress(&stream).unwrap(), img);
    }

    #[test]
    fn test_skewed_histogram_compresses() {
        let img = Image::from_fn(32, 32, 1, |y, x, _| if (x + y) % 16 == 0 { 255 } else { 0 }).unwrap();
        let stream = compress(&img);
        assert!(stream.len() < HEADER_LEN + SYMBOLS + 8 + 1024 / 4);
        assert_eq!(decompress(&stream).unwrap(), img);
    }

    #[test]
    fn test_rejects_oversubscribed_table() {
        let img = Image::from_fn(4, 4, 1, |_, x, _| x as u8).unwrap();
        let mut stream = compress(&img);
        for b in &mut stream[HEADER_LEN..HEADER_LEN + 4] {
            *b = 1;
        }
        assert!(matches!(decompress(&stream), Err(FilterError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_rejects_bitstream_shorter_than_sample_count() {
        let img = Image::filled(8, 8, 1, 200).unwrap();
        let mut stream = compress(&img);
        // 64 one-bit codes need 8 bytes; keep 7
        stream.pop();
        assert!(matches!(decompress(&stream), Err(FilterError::UnsupportedFormat(_))));

        // Header and count claim 8192x8192 with no bitstream at all
        let mut stream = b"HUF1".to_vec();
        stream.extend_from_slice(&8192u32.to_le_bytes());
        stream.extend_from_slice(&8192u32.to_le_bytes());
        stream.push(1);
        let mut lengths = [0u8; SYMBOLS];
        lengths[0] = 1;
        stream.extend_from_slice(&lengths);
        stream.extend_from_slice(&(8192u64 * 8192).to_le_bytes());
        assert!(matches!(decompress(&stream), Err(FilterError::UnsupportedFormat(_))));
    }
}
