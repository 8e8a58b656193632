//! Morphology filters: Erode, Dilate, Open, Close, Gradient, Skeleton.
//!
//! Min/max filters over a binary structuring element. Every channel is
//! processed independently and the border is replicated.

use log::debug;
use ndarray::{Array2, Array3, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::core::{clamp_index, replicate_plane};
use super::threshold::{binarize, otsu_threshold, FALLBACK_THRESHOLD};
use crate::buffer::Image;
use crate::error::{ensure_odd_kernel, ensure_range, Result};

/// Largest accepted structuring element side.
pub const MAX_ELEMENT_SIZE: usize = 31;
/// Largest accepted repeat count.
pub const MAX_ITERATIONS: usize = 10;

// ============================================================================
// Structuring Elements
// ============================================================================

/// Footprint of the structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ElementShape {
    #[default]
    Rect,
    /// Disk inscribed in the square.
    Ellipse,
    /// Centre row and centre column.
    Cross,
}

/// Binary footprint with odd side length.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuringElement {
    mask: Array2<bool>,
}

impl StructuringElement {
    pub fn new(shape: ElementShape, size: usize) -> Result<Self> {
        ensure_odd_kernel("kernel_size", size, MAX_ELEMENT_SIZE)?;
        let r = (size / 2) as f32;
        let mask = Array2::from_shape_fn((size, size), |(y, x)| {
            let dy = y as f32 - r;
            let dx = x as f32 - r;
            match shape {
                ElementShape::Rect => true,
                ElementShape::Ellipse => dx * dx + dy * dy <= r * r + 0.5,
                ElementShape::Cross => y == size / 2 || x == size / 2,
            }
        });
        Ok(StructuringElement { mask })
    }

    pub fn size(&self) -> usize {
        self.mask.dim().0
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// Offsets (dy, dx) of the active cells relative to the centre.
    fn offsets(&self) -> Vec<(isize, isize)> {
        let r = (self.size() / 2) as isize;
        self.mask
            .indexed_iter()
            .filter(|(_, &on)| on)
            .map(|((y, x), _)| (y as isize - r, x as isize - r))
            .collect()
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Morphological operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MorphOp {
    Erode,
    #[default]
    Dilate,
    /// Erosion followed by dilation.
    Open,
    /// Dilation followed by erosion.
    Close,
    /// Dilation minus erosion.
    Gradient,
    /// Binary skeleton of the Otsu-binarized luminance.
    Skeleton,
}

/// Parameters for [`morphology`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphologyParams {
    pub operation: MorphOp,
    pub shape: ElementShape,
    pub kernel_size: usize,
    pub iterations: usize,
}

impl Default for MorphologyParams {
    fn default() -> Self {
        Self {
            operation: MorphOp::Dilate,
            shape: ElementShape::Rect,
            kernel_size: 3,
            iterations: 1,
        }
    }
}

impl MorphologyParams {
    pub fn validate(&self) -> Result<()> {
        ensure_odd_kernel("kernel_size", self.kernel_size, MAX_ELEMENT_SIZE)?;
        ensure_range("iterations", self.iterations, 1, MAX_ITERATIONS)
    }
}

/// Apply a morphological operation.
///
/// # Arguments
/// * `image` - Grayscale or RGB image
/// * `params` - Operation, element shape/size and repeat count
///
/// # Returns
/// Image with the input's shape (skeleton output is binary 0/255)
pub fn morphology(image: &Image, params: &MorphologyParams) -> Result<Image> {
    params.validate()?;
    let element = StructuringElement::new(params.shape, params.kernel_size)?;
    let n = params.iterations;
    let input = image.view();

    let output = match params.operation {
        MorphOp::Erode => repeat(input, &element, n, MinMax::Min),
        MorphOp::Dilate => repeat(input, &element, n, MinMax::Max),
        MorphOp::Open => {
            let eroded = repeat(input, &element, n, MinMax::Min);
            repeat(eroded.view(), &element, n, MinMax::Max)
        }
        MorphOp::Close => {
            let dilated = repeat(input, &element, n, MinMax::Max);
            repeat(dilated.view(), &element, n, MinMax::Min)
        }
        MorphOp::Gradient => {
            let dilated = repeat(input, &element, n, MinMax::Max);
            let eroded = repeat(input, &element, n, MinMax::Min);
            let mut out = dilated;
            Zip::from(&mut out).and(&eroded).par_for_each(|d, &e| *d -= e);
            out
        }
        MorphOp::Skeleton => {
            let skeleton = skeleton(&image.to_luma(), &element);
            return Ok(replicate_plane(&skeleton, image.channels()));
        }
    };

    Ok(Image::from_array(output))
}

/// Erode (local minimum over the element).
pub fn erode(image: &Image, element: &StructuringElement, iterations: usize) -> Image {
    Image::from_array(repeat(image.view(), element, iterations, MinMax::Min))
}

/// Dilate (local maximum over the element).
pub fn dilate(image: &Image, element: &StructuringElement, iterations: usize) -> Image {
    Image::from_array(repeat(image.view(), element, iterations, MinMax::Max))
}

// ============================================================================
// Min / Max Filtering
// ============================================================================

#[derive(Clone, Copy)]
enum MinMax {
    Min,
    Max,
}

fn repeat(input: ArrayView3<u8>, element: &StructuringElement, iterations: usize, op: MinMax) -> Array3<u8> {
    let offsets = element.offsets();
    let mut current = min_max(input, &offsets, op);
    for _ in 1..iterations {
        current = min_max(current.view(), &offsets, op);
    }
    current
}

fn min_max(input: ArrayView3<u8>, offsets: &[(isize, isize)], op: MinMax) -> Array3<u8> {
    let (height, width, channels) = input.dim();
    let mut output = Array3::<u8>::zeros((height, width, channels));

    Zip::indexed(&mut output).par_for_each(|(y, x, c), out| {
        let mut acc = match op {
            MinMax::Min => u8::MAX,
            MinMax::Max => u8::MIN,
        };
        for &(dy, dx) in offsets {
            let sy = clamp_index(y as isize + dy, height);
            let sx = clamp_index(x as isize + dx, width);
            let v = input[[sy, sx, c]];
            acc = match op {
                MinMax::Min => acc.min(v),
                MinMax::Max => acc.max(v),
            };
        }
        *out = acc;
    });

    output
}

// ============================================================================
// Skeleton
// ============================================================================

/// Lantuéjoul skeleton: union over n of `erode^n(A) − open(erode^n(A))`.
fn skeleton(luma: &Array2<u8>, element: &StructuringElement) -> Array2<u8> {
    let cut = otsu_threshold(luma).unwrap_or(FALLBACK_THRESHOLD);
    let (height, width) = luma.dim();
    let offsets = element.offsets();

    let mut current = binarize(luma, cut, 255).insert_axis(Axis(2));
    let mut skel = Array2::<u8>::zeros((height, width));
    let max_steps = height.max(width);
    let mut steps = 0;

    while steps < max_steps && current.iter().any(|&v| v > 0) {
        let eroded = min_max(current.view(), &offsets, MinMax::Min);
        let opened = min_max(eroded.view(), &offsets, MinMax::Max);
        Zip::indexed(&mut skel).for_each(|(y, x), s| {
            if current[[y, x, 0]] > 0 && opened[[y, x, 0]] == 0 {
                *s = 255;
            }
        });
        current = eroded;
        steps += 1;
    }

    debug!("skeleton: {steps} erosion steps at cut {cut}");
    skel
}
