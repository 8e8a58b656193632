//! Marker-based watershed segmentation.
//!
//! Pipeline: Otsu binarization (the minority class is the foreground),
//! morphological opening, sure background by dilation, chamfer distance
//! transform, sure foreground near the distance maxima, connected-component
//! markers, and finally Meyer's priority flooding of the Sobel gradient.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use log::{debug, warn};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::buffer::Image;
use crate::error::{ensure_range, Result};
use crate::filters::edge::sobel_gradients;
use crate::filters::morphology::{dilate, erode, ElementShape, StructuringElement};
use crate::filters::threshold::otsu_threshold;

/// Color painted on basin boundaries.
pub const BOUNDARY_COLOR: [u8; 3] = [255, 0, 0];

const BOUNDARY: i32 = -1;
const UNKNOWN: i32 = 0;
const BACKGROUND: i32 = 1;

/// 4-connected neighbour offsets (dy, dx).
const NEIGHBOURS_4: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];

/// Parameters for [`watershed`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatershedParams {
    /// Sure-foreground cut as a fraction of the maximum distance, in (0, 1).
    pub foreground_ratio: f32,
    /// Iterations of the 3x3 opening that cleans the binary mask.
    pub opening_iterations: usize,
    /// Iterations of the 3x3 dilation that bounds the sure background.
    pub background_iterations: usize,
}

impl Default for WatershedParams {
    fn default() -> Self {
        Self {
            foreground_ratio: 0.7,
            opening_iterations: 2,
            background_iterations: 3,
        }
    }
}

impl WatershedParams {
    pub fn validate(&self) -> Result<()> {
        ensure_range("foreground_ratio", self.foreground_ratio, 0.01, 0.99)?;
        ensure_range("opening_iterations", self.opening_iterations, 1, 10)?;
        ensure_range("background_iterations", self.background_iterations, 1, 10)
    }
}

/// Segment an image and paint the basin boundaries red.
///
/// # Returns
/// RGB image; a constant input is returned unchanged (as RGB)
pub fn watershed(image: &Image, params: &WatershedParams) -> Result<Image> {
    let labels = flood_labels(image, params)?;
    let rgb = image.to_rgb();
    let Some(labels) = labels else {
        return Ok(rgb);
    };

    let mut data: Array3<u8> = rgb.into_array();
    for ((y, x), &label) in labels.indexed_iter() {
        if label == BOUNDARY {
            for c in 0..3 {
                data[[y, x, c]] = BOUNDARY_COLOR[c];
            }
        }
    }
    Ok(Image::from_array(data))
}

/// Label map of the segmentation: 0 marks boundaries (and pixels no basin
/// reached), 1 the background basin, 2.. the foreground objects.
pub fn watershed_labels(image: &Image, params: &WatershedParams) -> Result<Array2<u32>> {
    let labels = flood_labels(image, params)?;
    Ok(match labels {
        Some(labels) => labels.mapv(|l| if l > 0 { l as u32 } else { 0 }),
        None => Array2::from_elem((image.height(), image.width()), BACKGROUND as u32),
    })
}

/// Run the pipeline; `None` for images without any contrast.
fn flood_labels(image: &Image, params: &WatershedParams) -> Result<Option<Array2<i32>>> {
    params.validate()?;
    let luma = image.to_luma();
    let Some(cut) = otsu_threshold(&luma) else {
        warn!("watershed: constant image, nothing to segment");
        return Ok(None);
    };

    // Foreground is the minority side of the cut
    let above = luma.iter().filter(|&&v| v > cut).count();
    let fg_is_bright = above * 2 <= luma.len();
    let binary = luma.mapv(|v| if (v > cut) == fg_is_bright { 255u8 } else { 0 });

    let element = StructuringElement::new(ElementShape::Rect, 3)?;
    let mask = Image::from_plane(binary)?;
    let opened = dilate(
        &erode(&mask, &element, params.opening_iterations),
        &element,
        params.opening_iterations,
    );
    let sure_bg = dilate(&opened, &element, params.background_iterations);

    let opened_plane = opened.channel(0).to_owned();
    let dist = chamfer_distance(&opened_plane);
    let max_dist = dist.iter().cloned().fold(0.0f32, f32::max);
    let fg_cut = params.foreground_ratio * max_dist;
    let sure_fg = dist.mapv(|d| d > 0.0 && d >= fg_cut);

    // Markers: background = 1, objects = 2.., unknown = 0
    let mut markers = Array2::<i32>::from_elem(luma.dim(), UNKNOWN);
    for ((y, x), &v) in sure_bg.channel(0).indexed_iter() {
        if v == 0 {
            markers[[y, x]] = BACKGROUND;
        }
    }
    let objects = label_components(&sure_fg, &mut markers, BACKGROUND + 1);
    debug!(
        "watershed: otsu cut {cut}, max distance {max_dist:.2}, {objects} object marker(s)"
    );

    let gradient = sobel_gradients(&luma.mapv(|v| v as f32)).magnitude;
    meyer_flood(&gradient, &mut markers);
    Ok(Some(markers))
}

/// Two-pass 3x3 chamfer distance (weights 1 and √2) to the nearest zero pixel.
fn chamfer_distance(mask: &Array2<u8>) -> Array2<f32> {
    let (height, width) = mask.dim();
    let diag = std::f32::consts::SQRT_2;
    let far = (height + width) as f32 * 2.0;
    let mut dist = mask.mapv(|v| if v > 0 { far } else { 0.0 });

    let forward = [(-1isize, -1isize, diag), (-1, 0, 1.0), (-1, 1, diag), (0, -1, 1.0)];
    for y in 0..height {
        for x in 0..width {
            relax(&mut dist, y, x, &forward);
        }
    }
    let backward = [(1isize, 1isize, diag), (1, 0, 1.0), (1, -1, diag), (0, 1, 1.0)];
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            relax(&mut dist, y, x, &backward);
        }
    }
    dist
}

fn relax(dist: &mut Array2<f32>, y: usize, x: usize, offsets: &[(isize, isize, f32)]) {
    let (height, width) = dist.dim();
    let mut best = dist[[y, x]];
    if best == 0.0 {
        return;
    }
    for &(dy, dx, w) in offsets {
        let (ny, nx) = (y as isize + dy, x as isize + dx);
        if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
            continue;
        }
        best = best.min(dist[[ny as usize, nx as usize]] + w);
    }
    dist[[y, x]] = best;
}

/// Label 8-connected `true` regions starting at `first`. Returns the count.
fn label_components(mask: &Array2<bool>, markers: &mut Array2<i32>, first: i32) -> usize {
    let (height, width) = mask.dim();
    let mut visited = Array2::<bool>::from_elem((height, width), false);
    let mut next = first;
    let mut queue = VecDeque::new();

    for ((y, x), &on) in mask.indexed_iter() {
        if !on || visited[[y, x]] {
            continue;
        }
        visited[[y, x]] = true;
        queue.push_back((y, x));
        while let Some((cy, cx)) = queue.pop_front() {
            markers[[cy, cx]] = next;
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let (ny, nx) = (cy as isize + dy, cx as isize + dx);
                    if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                        continue;
                    }
                    let (ny, nx) = (ny as usize, nx as usize);
                    if mask[[ny, nx]] && !visited[[ny, nx]] {
                        visited[[ny, nx]] = true;
                        queue.push_back((ny, nx));
                    }
                }
            }
        }
        next += 1;
    }

    (next - first) as usize
}

/// Min-heap keyed by (quantized gradient, insertion order).
type FloodQueue = BinaryHeap<Reverse<(u32, u64, usize, usize)>>;

/// Meyer's flooding: grow markers in order of increasing gradient; a pixel
/// reached by two different basins becomes a boundary.
fn meyer_flood(gradient: &Array2<f32>, markers: &mut Array2<i32>) {
    let (height, width) = markers.dim();
    let mut queued = Array2::<bool>::from_elem((height, width), false);
    // Gradient levels are quantized so the heap key is totally ordered;
    // the sequence number keeps FIFO order within a level.
    let mut heap = FloodQueue::new();
    let mut seq = 0u64;

    let mut push = |heap: &mut FloodQueue, queued: &mut Array2<bool>, y: usize, x: usize| {
        queued[[y, x]] = true;
        let level = (gradient[[y, x]] * 16.0).round() as u32;
        heap.push(Reverse((level, seq, y, x)));
        seq += 1;
    };

    for y in 0..height {
        for x in 0..width {
            if markers[[y, x]] <= UNKNOWN {
                continue;
            }
            for (ny, nx) in neighbours_4(y, x, height, width) {
                if markers[[ny, nx]] == UNKNOWN && !queued[[ny, nx]] {
                    push(&mut heap, &mut queued, ny, nx);
                }
            }
        }
    }

    while let Some(Reverse((_, _, y, x))) = heap.pop() {
        let mut label = UNKNOWN;
        let mut conflict = false;
        for (ny, nx) in neighbours_4(y, x, height, width) {
            let l = markers[[ny, nx]];
            if l > UNKNOWN {
                if label == UNKNOWN {
                    label = l;
                } else if label != l {
                    conflict = true;
                }
            }
        }

        if conflict {
            markers[[y, x]] = BOUNDARY;
            continue;
        }
        if label == UNKNOWN {
            continue;
        }
        markers[[y, x]] = label;
        for (ny, nx) in neighbours_4(y, x, height, width) {
            if markers[[ny, nx]] == UNKNOWN && !queued[[ny, nx]] {
                push(&mut heap, &mut queued, ny, nx);
            }
        }
    }
}

fn neighbours_4(y: usize, x: usize, height: usize, width: usize) -> impl Iterator<Item = (usize, usize)> {
    NEIGHBOURS_4.iter().filter_map(move |&(dy, dx)| {
        let (ny, nx) = (y as isize + dy, x as isize + dx);
        if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
            None
        } else {
            Some((ny as usize, nx as usize))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_disks() -> Image {
        Image::from_fn(40, 20, 1, |y, x, _| {
            let d1 = (x as i32 - 10).pow(2) + (y as i32 - 10).pow(2);
            let d2 = (x as i32 - 30).pow(2) + (y as i32 - 10).pow(2);
            if d1 <= 36 || d2 <= 36 {
                200
            } else {
                30
            }
        })
        .unwrap()
    }

    #[test]
    fn test_two_objects_get_distinct_basins() {
        let labels = watershed_labels(&two_disks(), &WatershedParams::default()).unwrap();
        let left = labels[[10, 10]];
        let right = labels[[10, 30]];
        let background = labels[[0, 0]];
        assert!(left >= 2 && right >= 2);
        assert_ne!(left, right);
        assert_eq!(background, 1);
        assert!(labels.iter().any(|&l| l == 0));
    }

    #[test]
    fn test_boundaries_painted_red() {
        let result = watershed(&two_disks(), &WatershedParams::default()).unwrap();
        assert_eq!(result.channels(), 3);
        let red = (0..20)
            .flat_map(|y| (0..40).map(move |x| (x, y)))
            .filter(|&(x, y)| result.get(x, y, 0) == 255 && result.get(x, y, 1) == 0)
            .count();
        assert!(red > 0);
        // Object centres keep their gray value
        assert_eq!(result.get(10, 10, 0), 200);
        assert_eq!(result.get(10, 10, 1), 200);
    }

    #[test]
    fn test_constant_image_passes_through() {
        let img = Image::filled(6, 6, 1, 80).unwrap();
        let result = watershed(&img, &WatershedParams::default()).unwrap();
        assert_eq!(result, img.to_rgb());
        let labels = watershed_labels(&img, &WatershedParams::default()).unwrap();
        assert!(labels.iter().all(|&l| l == 1));
    }

    #[test]
    fn test_chamfer_distance() {
        let mask = Array2::from_shape_fn((5, 5), |(y, x)| if y == 0 || x == 0 { 0 } else { 255 });
        let dist = chamfer_distance(&mask);
        assert_eq!(dist[[0, 0]], 0.0);
        assert_eq!(dist[[1, 3]], 1.0);
        assert_eq!(dist[[3, 3]], 3.0);
    }

    #[test]
    fn test_rejects_bad_ratio() {
        let params = WatershedParams {
            foreground_ratio: 1.5,
            ..WatershedParams::default()
        };
        assert!(watershed(&two_disks(), &params).is_err());
    }
}
