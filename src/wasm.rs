//! WebAssembly exports for filterlab operators.
//!
//! These functions are exposed to JavaScript via wasm-bindgen. Images cross
//! the boundary as flat interleaved `u8` buffers plus their geometry;
//! errors become JavaScript exceptions carrying the error message.

use wasm_bindgen::prelude::*;

use crate::buffer::Image;
use crate::compression::{self, Codec};
use crate::error::FilterError;
use crate::features::{self, FeatureParams};
use crate::operator::{Operator, OperatorOutput};

fn to_js(err: FilterError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn to_image(data: &[u8], width: usize, height: usize, channels: usize) -> Result<Image, JsValue> {
    Image::from_raw(width, height, channels, data.to_vec()).map_err(to_js)
}

// ============================================================================
// Operators
// ============================================================================

/// Apply one operator described by a JSON document.
///
/// # Arguments
/// * `data` - Flat array of bytes (length = width * height * channels)
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
/// * `channels` - 1 (grayscale) or 3 (RGB)
/// * `operator` - e.g. `{"operator": "threshold", "method": "otsu"}`
///
/// # Returns
/// Flat array of the result image. Operators that change the channel count
/// (pseudocolor, watershed) return RGB.
#[wasm_bindgen]
pub fn apply_operator_wasm(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    operator: &str,
) -> Result<Vec<u8>, JsValue> {
    let input = to_image(data, width, height, channels)?;
    let op = Operator::from_json(operator).map_err(to_js)?;
    match op.apply(&input).map_err(to_js)? {
        OperatorOutput::Features(_) => Err(JsValue::from_str(
            "features produce no image; use extract_features_wasm",
        )),
        OperatorOutput::Image(image) => Ok(image.to_raw()),
        OperatorOutput::Compressed { reconstructed, .. } => Ok(reconstructed.to_raw()),
    }
}

// ============================================================================
// Features
// ============================================================================

/// Extract features as a JSON object string.
///
/// # Arguments
/// * `params` - e.g. `{"profile": "texture"}` or `{"profile": "color_histogram", "bins": 8}`
#[wasm_bindgen]
pub fn extract_features_wasm(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    params: &str,
) -> Result<String, JsValue> {
    let input = to_image(data, width, height, channels)?;
    let params: FeatureParams = serde_json::from_str(params)
        .map_err(|e| JsValue::from_str(&format!("invalid feature parameters: {e}")))?;
    let features = features::extract_features(&input, &params).map_err(to_js)?;
    features.to_json().map_err(to_js)
}

// ============================================================================
// Compression
// ============================================================================

/// Compress to a self-describing stream.
///
/// # Arguments
/// * `codec` - "rle", "huffman", "block_dct" or "wavelet"
/// * `quality` - 1-100, ignored by lossless codecs
#[wasm_bindgen]
pub fn compress_wasm(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    codec: &str,
    quality: u8,
) -> Result<Vec<u8>, JsValue> {
    let input = to_image(data, width, height, channels)?;
    let codec = codec.parse::<Codec>().map_err(to_js)?;
    compression::compress(&input, codec, quality).map_err(to_js)
}

/// Decode a stream into flat samples.
///
/// The geometry is stored in the stream header: bytes 4..8 hold the width
/// and 8..12 the height (u32 little-endian), byte 12 the channel count.
#[wasm_bindgen]
pub fn decompress_wasm(stream: &[u8]) -> Result<Vec<u8>, JsValue> {
    compression::decompress(stream).map(|image| image.to_raw()).map_err(to_js)
}
