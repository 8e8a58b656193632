//! Closed set of operators and their dispatch.
//!
//! An [`Operator`] pairs an operation with its validated parameters. It
//! deserializes from an internally tagged JSON document, for example
//!
//! ```json
//! {"operator": "gaussian_blur", "kernel_size": 5, "sigma": 1.0}
//! {"operator": "threshold", "method": "otsu"}
//! {"operator": "compress", "codec": "wavelet", "quality": 60}
//! ```
//!
//! Fields omitted from the document take their defaults.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::buffer::Image;
use crate::compression::{self, CompressParams};
use crate::error::{FilterError, Result};
use crate::features::{extract_features, FeatureParams, FeatureVector};
use crate::filters::{
    add_noise, color_balance, color_smoothing, convert_color_space, detect_edges, frequency_filter,
    gaussian_blur, intensity_transform, morphology, pseudocolor, reduce_noise, threshold,
    wavelet_transform, ColorBalanceParams, ColorSmoothingParams, ColorSpaceParams, DenoiseParams,
    EdgeParams, FrequencyParams, GaussianBlurParams, IntensityParams, MorphologyParams,
    NoiseParams, PseudocolorParams, ThresholdParams, WaveletParams,
};
use crate::segmentation::{grabcut, kmeans_segment, watershed, GrabCutParams, KMeansParams, WatershedParams};

/// Every operation the engine offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Operator {
    GaussianBlur(GaussianBlurParams),
    Edges(EdgeParams),
    Threshold(ThresholdParams),
    AddNoise(NoiseParams),
    Denoise(DenoiseParams),
    Morphology(MorphologyParams),
    Frequency(FrequencyParams),
    Intensity(IntensityParams),
    ColorBalance(ColorBalanceParams),
    ColorSpace(ColorSpaceParams),
    Pseudocolor(PseudocolorParams),
    ColorSmoothing(ColorSmoothingParams),
    Wavelet(WaveletParams),
    Kmeans(KMeansParams),
    Watershed(WatershedParams),
    Grabcut(GrabCutParams),
    Compress(CompressParams),
    Features(FeatureParams),
}

/// What an operator produces.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorOutput {
    Image(Image),
    /// Encoded stream and its decoded reconstruction.
    Compressed { stream: Vec<u8>, reconstructed: Image },
    Features(FeatureVector),
}

impl OperatorOutput {
    /// The displayable image, if any: the result image or the reconstruction.
    pub fn image(&self) -> Option<&Image> {
        match self {
            OperatorOutput::Image(image) => Some(image),
            OperatorOutput::Compressed { reconstructed, .. } => Some(reconstructed),
            OperatorOutput::Features(_) => None,
        }
    }

    pub fn into_image(self) -> Option<Image> {
        match self {
            OperatorOutput::Image(image) => Some(image),
            OperatorOutput::Compressed { reconstructed, .. } => Some(reconstructed),
            OperatorOutput::Features(_) => None,
        }
    }
}

impl Operator {
    /// Parse an operator document.
    pub fn from_json(json: &str) -> Result<Operator> {
        serde_json::from_str(json)
            .map_err(|e| FilterError::invalid(format!("invalid operator document: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| FilterError::InternalFailure(e.to_string()))
    }

    /// Tag used in operator documents.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::GaussianBlur(_) => "gaussian_blur",
            Operator::Edges(_) => "edges",
            Operator::Threshold(_) => "threshold",
            Operator::AddNoise(_) => "add_noise",
            Operator::Denoise(_) => "denoise",
            Operator::Morphology(_) => "morphology",
            Operator::Frequency(_) => "frequency",
            Operator::Intensity(_) => "intensity",
            Operator::ColorBalance(_) => "color_balance",
            Operator::ColorSpace(_) => "color_space",
            Operator::Pseudocolor(_) => "pseudocolor",
            Operator::ColorSmoothing(_) => "color_smoothing",
            Operator::Wavelet(_) => "wavelet",
            Operator::Kmeans(_) => "kmeans",
            Operator::Watershed(_) => "watershed",
            Operator::Grabcut(_) => "grabcut",
            Operator::Compress(_) => "compress",
            Operator::Features(_) => "features",
        }
    }

    /// Run the operator on `image`.
    ///
    /// Parameters are validated first; the input is never modified.
    pub fn apply(&self, image: &Image) -> Result<OperatorOutput> {
        debug!(
            "apply {} to {}x{}x{}",
            self.name(),
            image.width(),
            image.height(),
            image.channels()
        );
        let image = match self {
            Operator::GaussianBlur(p) => gaussian_blur(image, p)?,
            Operator::Edges(p) => detect_edges(image, p)?,
            Operator::Threshold(p) => threshold(image, p)?,
            Operator::AddNoise(p) => add_noise(image, p)?,
            Operator::Denoise(p) => reduce_noise(image, p)?,
            Operator::Morphology(p) => morphology(image, p)?,
            Operator::Frequency(p) => frequency_filter(image, p)?,
            Operator::Intensity(p) => intensity_transform(image, p)?,
            Operator::ColorBalance(p) => color_balance(image, p)?,
            Operator::ColorSpace(p) => convert_color_space(image, p)?,
            Operator::Pseudocolor(p) => pseudocolor(image, p)?,
            Operator::ColorSmoothing(p) => color_smoothing(image, p)?,
            Operator::Wavelet(p) => wavelet_transform(image, p)?,
            Operator::Kmeans(p) => kmeans_segment(image, p)?.image,
            Operator::Watershed(p) => watershed(image, p)?,
            Operator::Grabcut(p) => grabcut(image, p)?,
            Operator::Compress(p) => {
                let stream = compression::compress_with(image, p)?;
                let reconstructed = compression::decompress(&stream)?;
                return Ok(OperatorOutput::Compressed {
                    stream,
                    reconstructed,
                });
            }
            Operator::Features(p) => {
                return Ok(OperatorOutput::Features(extract_features(image, p)?));
            }
        };
        Ok(OperatorOutput::Image(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Codec;
    use crate::filters::ThresholdMethod;

    fn gradient() -> Image {
        Image::from_fn(16, 12, 3, |y, x, c| (x * 12 + y * 4 + c * 30) as u8).unwrap()
    }

    #[test]
    fn test_parse_with_defaults() {
        let op = Operator::from_json(r#"{"operator": "gaussian_blur"}"#).unwrap();
        assert_eq!(op, Operator::GaussianBlur(GaussianBlurParams::default()));

        let op = Operator::from_json(r#"{"operator": "kmeans", "k": 4}"#).unwrap();
        match op {
            Operator::Kmeans(p) => {
                assert_eq!(p.k, 4);
                assert_eq!(p.max_iterations, KMeansParams::default().max_iterations);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_nested_tags() {
        let op = Operator::from_json(r#"{"operator": "threshold", "method": "otsu"}"#).unwrap();
        match op {
            Operator::Threshold(p) => {
                assert_eq!(p.method, ThresholdMethod::Otsu);
                assert_eq!(p.max_value, 255);
            }
            other => panic!("unexpected {other:?}"),
        }

        let op = Operator::from_json(
            r#"{"operator": "edges", "method": "canny", "low": 50, "high": 150}"#,
        )
        .unwrap();
        assert_eq!(
            op,
            Operator::Edges(EdgeParams::Canny {
                low: 50.0,
                high: 150.0,
                blur_size: 5
            })
        );
    }

    #[test]
    fn test_unknown_operator_is_invalid() {
        let err = Operator::from_json(r#"{"operator": "sharpen"}"#).unwrap_err();
        assert!(matches!(err, FilterError::InvalidParameter(_)));
        assert!(Operator::from_json("not json").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let op = Operator::Compress(CompressParams {
            codec: Codec::Huffman,
            quality: 40,
            levels: 2,
        });
        let json = op.to_json().unwrap();
        assert!(json.contains("\"operator\":\"compress\""));
        assert_eq!(Operator::from_json(&json).unwrap(), op);
    }

    #[test]
    fn test_apply_image_operators_keep_dimensions() {
        let img = gradient();
        let ops = [
            r#"{"operator": "gaussian_blur", "kernel_size": 3}"#,
            r#"{"operator": "edges", "method": "sobel"}"#,
            r#"{"operator": "denoise", "method": "median", "kernel_size": 3}"#,
            r#"{"operator": "morphology", "operation": "open"}"#,
            r#"{"operator": "frequency", "filter": "lowpass"}"#,
            r#"{"operator": "intensity", "transform": "equalize"}"#,
            r#"{"operator": "wavelet"}"#,
            r#"{"operator": "kmeans", "k": 2}"#,
        ];
        for json in ops {
            let op = Operator::from_json(json).unwrap();
            let out = op.apply(&img).unwrap();
            let result = out.image().unwrap();
            assert_eq!(result.width(), 16, "{}", op.name());
            assert_eq!(result.height(), 12, "{}", op.name());
        }
    }

    #[test]
    fn test_apply_compress_and_features() {
        let img = gradient();
        let out = Operator::from_json(r#"{"operator": "compress", "codec": "rle"}"#)
            .unwrap()
            .apply(&img)
            .unwrap();
        match out {
            OperatorOutput::Compressed {
                stream,
                reconstructed,
            } => {
                assert_eq!(&stream[..4], b"RLE1");
                assert_eq!(reconstructed, img);
            }
            other => panic!("unexpected {other:?}"),
        }

        let out = Operator::Features(FeatureParams::default()).apply(&img).unwrap();
        assert!(out.image().is_none());
        match out {
            OperatorOutput::Features(f) => assert_eq!(f.len(), 12),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_apply_validates_before_running() {
        let img = gradient();
        let op = Operator::GaussianBlur(GaussianBlurParams {
            kernel_size: 4,
            sigma: 1.0,
        });
        assert!(matches!(op.apply(&img), Err(FilterError::InvalidParameter(_))));
    }
}
