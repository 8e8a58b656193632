//! filterlab
//!
//! Deterministic image-processing operators: spatial and frequency-domain
//! filters, morphology, color transforms, segmentation, compression codecs
//! and feature extraction, with Python bindings via PyO3 and WASM bindings
//! for JavaScript.
//!
//! ## Image Format
//! Every operator works on [`Image`], a `(height, width, channels)` array of
//! `u8` samples:
//! - **Grayscale**: (height, width, 1) - single channel
//! - **RGB**: (height, width, 3) - 3 color channels
//!
//! ## Operator Contract
//! Operators borrow their input and return a new image, a compressed stream
//! or a [`FeatureVector`]. Parameters are validated before any pixel is
//! read; failures are reported as [`FilterError`]. The closed [`Operator`]
//! enum dispatches any operation from a JSON document.

pub mod buffer;
pub mod compression;
pub mod error;
pub mod features;
pub mod filters;
pub mod metrics;
pub mod operator;
pub mod segmentation;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use buffer::Image;
pub use compression::{compress, decompress, Codec, CompressParams};
pub use error::{FilterError, Result};
pub use features::{extract_features, FeatureParams, FeatureProfile, FeatureVector};
pub use metrics::{compare, mse, psnr, ssim, Comparison, ImageStats};
pub use operator::{Operator, OperatorOutput};

// Python bindings (only when python feature is enabled)
#[cfg(feature = "python")]
mod python {
    use numpy::{IntoPyArray, PyArray3, PyReadonlyArray3};
    use pyo3::exceptions::PyValueError;
    use pyo3::prelude::*;
    use pyo3::types::{PyBytes, PyDict};

    use crate::buffer::Image;
    use crate::compression::{self, Codec};
    use crate::error::FilterError;
    use crate::features::{self, FeatureParams, FeatureProfile};
    use crate::metrics;
    use crate::operator::{Operator, OperatorOutput};

    fn to_py_err(err: FilterError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }

    fn to_image(image: PyReadonlyArray3<'_, u8>) -> PyResult<Image> {
        Image::new(image.as_array().to_owned()).map_err(to_py_err)
    }

    // ========================================================================
    // Operators
    // ========================================================================

    /// Apply one operator described by a JSON document.
    ///
    /// # Arguments
    /// * `image` - Input image (height, width, 1 or 3), u8
    /// * `operator` - e.g. `{"operator": "gaussian_blur", "kernel_size": 5}`
    ///
    /// # Returns
    /// Result image; for `compress` the decoded reconstruction
    #[pyfunction]
    pub fn apply_operator<'py>(
        py: Python<'py>,
        image: PyReadonlyArray3<'py, u8>,
        operator: &str,
    ) -> PyResult<Bound<'py, PyArray3<u8>>> {
        let input = to_image(image)?;
        let op = Operator::from_json(operator).map_err(to_py_err)?;
        let output = py
            .allow_threads(|| op.apply(&input))
            .map_err(to_py_err)?;
        match output {
            OperatorOutput::Features(_) => Err(PyValueError::new_err(
                "features produce no image; use extract_features",
            )),
            other => match other.into_image() {
                Some(image) => Ok(image.into_array().into_pyarray(py)),
                None => Err(PyValueError::new_err("operator produced no image")),
            },
        }
    }

    // ========================================================================
    // Feature Extraction
    // ========================================================================

    /// Extract a feature profile as a `{name: value}` dict.
    ///
    /// # Arguments
    /// * `profile` - "basic", "texture" or "color_histogram"
    /// * `bins` - Histogram buckets per channel (color_histogram only)
    #[pyfunction]
    #[pyo3(signature = (image, profile="basic", bins=16))]
    pub fn extract_features<'py>(
        py: Python<'py>,
        image: PyReadonlyArray3<'py, u8>,
        profile: &str,
        bins: usize,
    ) -> PyResult<Bound<'py, PyDict>> {
        let input = to_image(image)?;
        let params = FeatureParams {
            profile: profile.parse::<FeatureProfile>().map_err(to_py_err)?,
            bins,
        };
        let features = features::extract_features(&input, &params).map_err(to_py_err)?;

        let dict = PyDict::new(py);
        for (name, value) in features.iter() {
            dict.set_item(name, value)?;
        }
        Ok(dict)
    }

    // ========================================================================
    // Compression
    // ========================================================================

    /// Compress an image into a self-describing stream.
    ///
    /// # Arguments
    /// * `codec` - "rle", "huffman", "block_dct" (alias "jpeg") or "wavelet"
    /// * `quality` - 1-100, ignored by lossless codecs
    #[pyfunction]
    #[pyo3(signature = (image, codec="block_dct", quality=75))]
    pub fn compress<'py>(
        py: Python<'py>,
        image: PyReadonlyArray3<'py, u8>,
        codec: &str,
        quality: u8,
    ) -> PyResult<Bound<'py, PyBytes>> {
        let input = to_image(image)?;
        let codec = codec.parse::<Codec>().map_err(to_py_err)?;
        let stream = py
            .allow_threads(|| compression::compress(&input, codec, quality))
            .map_err(to_py_err)?;
        Ok(PyBytes::new(py, &stream))
    }

    /// Decode a stream produced by `compress`.
    #[pyfunction]
    pub fn decompress<'py>(py: Python<'py>, stream: &[u8]) -> PyResult<Bound<'py, PyArray3<u8>>> {
        let image = compression::decompress(stream).map_err(to_py_err)?;
        Ok(image.into_array().into_pyarray(py))
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// MSE, PSNR and SSIM between two same-shaped images.
    #[pyfunction]
    pub fn compare_images<'py>(
        py: Python<'py>,
        original: PyReadonlyArray3<'py, u8>,
        processed: PyReadonlyArray3<'py, u8>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let a = to_image(original)?;
        let b = to_image(processed)?;
        let comparison = metrics::compare(&a, &b).map_err(to_py_err)?;

        let dict = PyDict::new(py);
        dict.set_item("mse", comparison.mse)?;
        dict.set_item("psnr", comparison.psnr)?;
        dict.set_item("ssim", comparison.ssim)?;
        dict.set_item("original_mean", comparison.original.mean)?;
        dict.set_item("original_std", comparison.original.std)?;
        dict.set_item("processed_mean", comparison.processed.mean)?;
        dict.set_item("processed_std", comparison.processed.std)?;
        Ok(dict)
    }

    // ========================================================================
    // Module Definition
    // ========================================================================

    #[pymodule]
    pub fn filterlab(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(apply_operator, m)?)?;
        m.add_function(wrap_pyfunction!(extract_features, m)?)?;
        m.add_function(wrap_pyfunction!(compress, m)?)?;
        m.add_function(wrap_pyfunction!(decompress, m)?)?;
        m.add_function(wrap_pyfunction!(compare_images, m)?)?;
        Ok(())
    }
}

#[cfg(feature = "python")]
pub use python::filterlab;
