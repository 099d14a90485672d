//! Bounding-box annotation sanitizer
//!
//! This library cleans object-detection labels before training: it drops
//! malformed and out-of-bounds boxes, caps per-image box density, removes
//! boxes too small to be useful, suppresses same-class duplicates, and
//! reconciles the image set with the label set.
//!
//! The core ([`pipeline`], [`filters`], [`geometry`], [`consistency`]) works on
//! an in-memory [`Dataset`]. The [`io`], [`formats`] and [`coco`] modules read
//! and write split directories around it.

pub mod coco;
pub mod config;
pub mod consistency;
pub mod error;
pub mod filters;
pub mod formats;
pub mod geometry;
pub mod io;
pub mod pipeline;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::{Args, LabelFormat, SanitizeConfig};
pub use consistency::{reconcile, ConsistencyReport};
pub use error::{MalformedBoxError, SanitizeError};
pub use io::{load_split, resolve_splits, sanitize_split, SplitPaths};
pub use pipeline::{sanitize_dataset, sanitize_image, SanitizeReport};
pub use types::{BoundingBox, Counters, Dataset, ImageAnnotation};
