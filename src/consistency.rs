//! Reconciliation of image presence against label presence.

use log::debug;
use std::collections::BTreeSet;

use crate::types::{Counters, Dataset};

/// Ids removed by [`reconcile`], so the caller can delete the backing files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Images with no label artifact.
    pub orphan_images: Vec<String>,
    /// Label artifacts with no image.
    pub orphan_labels: Vec<String>,
    /// Images dropped with their label because every box was filtered out.
    pub empty_images: Vec<String>,
}

/// Make the retained image ids and label ids equal.
///
/// Both passes work on a snapshot of the id sets taken on entry. A label that
/// ends up with zero boxes still counts as present unless `drop_empty_images`
/// is set, in which case the image and its label are removed together.
pub fn reconcile(dataset: &mut Dataset, drop_empty_images: bool, counters: &mut Counters) -> ConsistencyReport {
    let image_ids = dataset.image_ids.clone();
    let label_ids = dataset.label_ids();

    let orphan_images: Vec<String> = image_ids.difference(&label_ids).cloned().collect();
    let orphan_labels: Vec<String> = label_ids.difference(&image_ids).cloned().collect();

    for id in &orphan_images {
        debug!("Removing image without label: {}", id);
        dataset.image_ids.remove(id);
    }
    for id in &orphan_labels {
        debug!("Removing label without image: {}", id);
        dataset.annotations.remove(id);
    }
    counters.orphan_images_removed += orphan_images.len();
    counters.orphan_labels_removed += orphan_labels.len();

    let empty_images = if drop_empty_images {
        let empty: BTreeSet<String> = dataset
            .annotations
            .iter()
            .filter(|(_, annotation)| annotation.boxes.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &empty {
            debug!("Removing image with no remaining boxes: {}", id);
            dataset.annotations.remove(id);
            dataset.image_ids.remove(id);
        }
        counters.empty_images_removed += empty.len();
        empty.into_iter().collect()
    } else {
        Vec::new()
    };

    ConsistencyReport {
        orphan_images,
        orphan_labels,
        empty_images,
    }
}
