//! Segmentation: k-means color clustering, marker-based watershed and
//! GrabCut foreground extraction.

pub mod grabcut;
pub mod kmeans;
mod maxflow;
pub mod watershed;

pub use grabcut::{grabcut, grabcut_mask, GrabCutParams, Rect};
pub use kmeans::{kmeans_segment, KMeansParams, KMeansResult};
pub use watershed::{watershed, watershed_labels, WatershedParams};
