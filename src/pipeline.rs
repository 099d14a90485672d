use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::SanitizeConfig;
use crate::consistency::{reconcile, ConsistencyReport};
use crate::error::SanitizeError;
use crate::filters::{cap_box_count, remove_invalid_boxes, remove_small_boxes, suppress_same_class_overlaps};
use crate::types::{Counters, Dataset, ImageAnnotation};

/// Result of one sanitization run over a split.
#[derive(Debug, Clone)]
pub struct SanitizeReport {
    pub dataset: Dataset,
    pub counters: Counters,
    pub consistency: ConsistencyReport,
    /// Base seed actually used; replaying with it reproduces the run.
    pub seed: u64,
}

/// Derive the sampling seed of one image from the run seed and its id.
///
/// Independent of processing order, so parallel runs stay reproducible.
pub fn image_seed(seed: u64, image_id: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = image_id
        .bytes()
        .fold(FNV_OFFSET, |h, byte| (h ^ byte as u64).wrapping_mul(FNV_PRIME));
    seed ^ hash
}

/// Run every per-image stage on one annotation, in order.
pub fn sanitize_image(annotation: &mut ImageAnnotation, config: &SanitizeConfig, seed: u64) -> Counters {
    let mut counters = Counters::new();
    let mut rng = StdRng::seed_from_u64(image_seed(seed, &annotation.image_id));

    remove_invalid_boxes(annotation, &mut counters);
    let boxes = std::mem::take(&mut annotation.boxes);
    let boxes = cap_box_count(boxes, config.max_box_count, &mut rng, &mut counters);
    let boxes = remove_small_boxes(
        boxes,
        annotation.width,
        annotation.height,
        config.min_area_ratio,
        &mut counters,
    );
    annotation.boxes = suppress_same_class_overlaps(boxes, config.max_iou, &mut counters);

    if !counters.is_zero() {
        debug!(
            "{}: removed {} boxes, {} remaining",
            annotation.image_id,
            counters.boxes_removed(),
            annotation.boxes.len()
        );
    }
    counters
}

/// Sanitize every image of a split in parallel, then reconcile images and labels.
pub fn sanitize_dataset(mut dataset: Dataset, config: &SanitizeConfig) -> Result<SanitizeReport, SanitizeError> {
    config.validate()?;

    let seed = config
        .random_seed
        .unwrap_or_else(|| rand::thread_rng().gen());
    info!(
        "Sanitizing {} label files and {} images (seed {})",
        dataset.annotations.len(),
        dataset.image_ids.len(),
        seed
    );

    let boxes_before = dataset.total_boxes();
    let mut counters = dataset
        .annotations
        .par_iter_mut()
        .map(|(_, annotation)| sanitize_image(annotation, config, seed))
        .reduce(Counters::new, Counters::merge);
    info!(
        "Filtering kept {} of {} boxes",
        dataset.total_boxes(),
        boxes_before
    );

    // Runs only after every per-image task has joined.
    let consistency = reconcile(&mut dataset, config.drop_empty_images, &mut counters);

    Ok(SanitizeReport {
        dataset,
        counters,
        consistency,
        seed,
    })
}
