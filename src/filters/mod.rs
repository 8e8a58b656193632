//! Filter modules for image processing effects.
//!
//! ## Supported Formats
//!
//! | Format | Shape | Type | Description |
//! |--------|-------|------|-------------|
//! | Grayscale8 | (H, W, 1) | u8 | Single luminance channel, 0-255 |
//! | RGB8 | (H, W, 3) | u8 | Red, green, blue, 0-255 |
//!
//! ## Architecture
//!
//! All filters follow these principles:
//! - **Pure** - Input is borrowed, output is freshly allocated
//! - **Validated** - Parameter structs are checked before any pixel is read
//! - **Replicated borders** - Neighbourhoods clamp coordinates to the image
//! - **Parallel** - Per-sample loops use rayon through `ndarray::Zip`
//!
//! ## Filter Categories
//!
//! - **Smoothing**: gaussian_blur, reduce_noise (median, Gaussian, bilateral)
//! - **Edge detection**: Sobel, Canny
//! - **Thresholding**: binary, Otsu, adaptive
//! - **Noise**: add_noise (Gaussian, salt-and-pepper, speckle)
//! - **Morphology**: erode, dilate, open, close, gradient, skeleton
//! - **Frequency**: lowpass, highpass, bandpass (ideal or Butterworth)
//! - **Intensity**: linear, log, gamma, histogram equalization
//! - **Color**: balance, color space, pseudocolor, chroma smoothing (RGB only
//!   except pseudocolor and gray conversion)
//! - **Wavelet**: multi-level DWT mosaic

pub mod core;
pub mod blur;
pub mod edge;
pub mod threshold;
pub mod noise;
pub mod morphology;
pub mod frequency;
pub mod intensity;
pub mod color;
pub mod wavelet;

pub use blur::{gaussian_blur, GaussianBlurParams};
pub use color::{
    color_balance, color_smoothing, convert_color_space, pseudocolor, ColorBalanceParams,
    ColorSmoothingParams, ColorSpace, ColorSpaceParams, Colormap, PseudocolorParams,
};
pub use self::core::Kernel;
pub use edge::{detect_edges, EdgeParams};
pub use frequency::{frequency_filter, FrequencyFilter, FrequencyMask, FrequencyParams, MaskProfile};
pub use intensity::{intensity_transform, IntensityParams};
pub use morphology::{morphology, ElementShape, MorphOp, MorphologyParams, StructuringElement};
pub use noise::{add_noise, reduce_noise, DenoiseParams, NoiseKind, NoiseParams};
pub use threshold::{otsu_threshold, threshold, AdaptiveMethod, ThresholdMethod, ThresholdParams};
pub use wavelet::{wavelet_transform, WaveletFamily, WaveletParams};
