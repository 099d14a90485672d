//! Per-image filtering stages.
//!
//! Each stage takes the boxes of one image and returns the boxes it keeps,
//! adding the number it dropped to a [`Counters`] value owned by the caller.

use log::debug;
use rand::seq::index;
use rand::Rng;

use crate::geometry::{area, iou};
use crate::types::{BoundingBox, Counters, ImageAnnotation};

/// Whether a box lies inside the image and has positive extent on both axes.
pub fn is_valid_box(b: &BoundingBox, width: u32, height: u32) -> bool {
    b.is_finite()
        && b.x_min >= 0.0
        && b.y_min >= 0.0
        && b.x_max <= width as f64
        && b.y_max <= height as f64
        && b.x_min < b.x_max
        && b.y_min < b.y_max
}

/// Drop malformed records and boxes outside the image bounds.
///
/// Invalid boxes are removed, never clamped. Order is preserved.
pub fn remove_invalid_boxes(annotation: &mut ImageAnnotation, counters: &mut Counters) {
    for malformed in annotation.malformed.drain(..) {
        debug!("{}: dropping malformed box ({})", annotation.image_id, malformed);
        counters.invalid_removed += 1;
    }

    let (width, height) = (annotation.width, annotation.height);
    let before = annotation.boxes.len();
    annotation.boxes.retain(|b| is_valid_box(b, width, height));
    let removed = before - annotation.boxes.len();
    if removed > 0 {
        debug!(
            "{}: dropping {} boxes outside {}x{}",
            annotation.image_id, removed, width, height
        );
    }
    counters.invalid_removed += removed;
}

/// Keep at most `max_box_count` boxes, chosen uniformly without replacement.
pub fn cap_box_count<R: Rng + ?Sized>(
    boxes: Vec<BoundingBox>,
    max_box_count: usize,
    rng: &mut R,
    counters: &mut Counters,
) -> Vec<BoundingBox> {
    if boxes.len() <= max_box_count {
        return boxes;
    }

    counters.density_capped_removed += boxes.len() - max_box_count;
    index::sample(rng, boxes.len(), max_box_count)
        .into_iter()
        .map(|i| boxes[i])
        .collect()
}

/// Drop boxes whose area is below `min_area_ratio` of the image area.
pub fn remove_small_boxes(
    boxes: Vec<BoundingBox>,
    width: u32,
    height: u32,
    min_area_ratio: f64,
    counters: &mut Counters,
) -> Vec<BoundingBox> {
    let image_area = width as f64 * height as f64;
    if image_area <= 0.0 {
        counters.small_removed += boxes.len();
        return Vec::new();
    }

    let before = boxes.len();
    let kept: Vec<BoundingBox> = boxes
        .into_iter()
        .filter(|b| area(b) / image_area >= min_area_ratio)
        .collect();
    counters.small_removed += before - kept.len();
    kept
}

/// Suppress near-duplicate boxes of the same class.
///
/// Pairs `(i, j)` with `i < j` are visited in index order. When a same-class
/// pair overlaps with IoU above `max_iou`, the smaller box is marked removed;
/// on equal area the later index goes. Pairs touching an already removed
/// index are skipped. Boxes of different classes never suppress each other.
pub fn suppress_same_class_overlaps(
    boxes: Vec<BoundingBox>,
    max_iou: f64,
    counters: &mut Counters,
) -> Vec<BoundingBox> {
    if boxes.len() < 2 {
        return boxes;
    }

    let mut removed = vec![false; boxes.len()];
    for i in 0..boxes.len() - 1 {
        for j in i + 1..boxes.len() {
            if removed[i] || removed[j] {
                continue;
            }
            let (a, b) = (&boxes[i], &boxes[j]);
            if a.class_id != b.class_id {
                continue;
            }
            if iou(a, b) > max_iou {
                let victim = if area(a) < area(b) { i } else { j };
                removed[victim] = true;
            }
        }
    }

    let removed_count = removed.iter().filter(|&&r| r).count();
    counters.overlap_removed += removed_count;

    boxes
        .into_iter()
        .zip(removed)
        .filter_map(|(b, r)| (!r).then_some(b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MalformedBoxError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bbox(class_id: u32, x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> BoundingBox {
        BoundingBox::new(class_id, x_min, y_min, x_max, y_max)
    }

    #[test]
    fn test_remove_invalid_boxes() {
        let mut annotation = ImageAnnotation::new(
            "img",
            100,
            50,
            vec![
                bbox(0, 10.0, 10.0, 20.0, 20.0),
                bbox(0, -1.0, 10.0, 20.0, 20.0),
                bbox(1, 10.0, 10.0, 101.0, 20.0),
                bbox(1, 10.0, 10.0, 20.0, 51.0),
                bbox(2, 20.0, 10.0, 20.0, 20.0),
                bbox(2, 30.0, 10.0, 20.0, 20.0),
                bbox(3, f64::NAN, 10.0, 20.0, 20.0),
                bbox(3, 0.0, 0.0, 100.0, 50.0),
            ],
        );
        annotation
            .malformed
            .push(MalformedBoxError::new(9, "expected 5 fields, found 3"));

        let mut counters = Counters::new();
        remove_invalid_boxes(&mut annotation, &mut counters);

        assert_eq!(
            annotation.boxes,
            vec![bbox(0, 10.0, 10.0, 20.0, 20.0), bbox(3, 0.0, 0.0, 100.0, 50.0)]
        );
        assert!(annotation.malformed.is_empty());
        assert_eq!(counters.invalid_removed, 7);
    }

    #[test]
    fn test_cap_box_count_under_limit_is_unchanged() {
        let boxes: Vec<_> = (0..5).map(|i| bbox(i, 0.0, 0.0, 1.0, 1.0)).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let mut counters = Counters::new();
        let kept = cap_box_count(boxes.clone(), 5, &mut rng, &mut counters);
        assert_eq!(kept, boxes);
        assert_eq!(counters.density_capped_removed, 0);
    }

    #[test]
    fn test_cap_box_count_samples_without_replacement() {
        let boxes: Vec<_> = (0..40).map(|i| bbox(i, 0.0, 0.0, 1.0, 1.0)).collect();
        let mut counters = Counters::new();

        let first = cap_box_count(boxes.clone(), 30, &mut StdRng::seed_from_u64(7), &mut counters);
        let second = cap_box_count(boxes.clone(), 30, &mut StdRng::seed_from_u64(7), &mut Counters::new());

        assert_eq!(first.len(), 30);
        assert_eq!(counters.density_capped_removed, 10);
        assert_eq!(first, second);

        let mut ids: Vec<u32> = first.iter().map(|b| b.class_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 30);
    }

    #[test]
    fn test_remove_small_boxes() {
        let boxes = vec![
            bbox(0, 0.0, 0.0, 5.0, 1.0),  // area 5, ratio 0.0005
            bbox(0, 0.0, 0.0, 10.0, 2.0), // area 20, ratio 0.002
            bbox(0, 0.0, 0.0, 10.0, 1.0), // area 10, exactly the threshold
        ];
        let mut counters = Counters::new();
        let kept = remove_small_boxes(boxes, 100, 100, 0.001, &mut counters);
        assert_eq!(
            kept,
            vec![bbox(0, 0.0, 0.0, 10.0, 2.0), bbox(0, 0.0, 0.0, 10.0, 1.0)]
        );
        assert_eq!(counters.small_removed, 1);
    }

    #[test]
    fn test_suppress_equal_area_removes_later() {
        let boxes = vec![
            bbox(0, 0.0, 0.0, 100.0, 100.0),
            bbox(0, 5.0, 5.0, 105.0, 105.0),
            bbox(1, 0.0, 0.0, 50.0, 50.0),
        ];
        let mut counters = Counters::new();
        let kept = suppress_same_class_overlaps(boxes, 0.35, &mut counters);
        assert_eq!(
            kept,
            vec![bbox(0, 0.0, 0.0, 100.0, 100.0), bbox(1, 0.0, 0.0, 50.0, 50.0)]
        );
        assert_eq!(counters.overlap_removed, 1);
    }

    #[test]
    fn test_suppress_removes_smaller_box() {
        let boxes = vec![bbox(0, 0.0, 0.0, 90.0, 90.0), bbox(0, 0.0, 0.0, 100.0, 100.0)];
        let mut counters = Counters::new();
        let kept = suppress_same_class_overlaps(boxes, 0.35, &mut counters);
        assert_eq!(kept, vec![bbox(0, 0.0, 0.0, 100.0, 100.0)]);
        assert_eq!(counters.overlap_removed, 1);
    }

    #[test]
    fn test_suppress_never_crosses_classes() {
        let boxes = vec![bbox(0, 0.0, 0.0, 10.0, 10.0), bbox(1, 0.0, 0.0, 10.0, 10.0)];
        let mut counters = Counters::new();
        let kept = suppress_same_class_overlaps(boxes.clone(), 0.35, &mut counters);
        assert_eq!(kept, boxes);
        assert_eq!(counters.overlap_removed, 0);
    }

    #[test]
    fn test_suppress_skips_pairs_with_removed_index() {
        // Box 1 loses to box 0 first. Box 2 would lose to box 1, but that pair
        // is skipped once box 1 is gone, and box 2 barely overlaps box 0.
        let boxes = vec![
            bbox(0, 0.0, 0.0, 10.0, 10.0),
            bbox(0, 3.0, 0.0, 12.0, 10.0),
            bbox(0, 6.0, 0.0, 14.0, 10.0),
        ];
        let mut counters = Counters::new();
        let kept = suppress_same_class_overlaps(boxes, 0.35, &mut counters);
        assert_eq!(
            kept,
            vec![bbox(0, 0.0, 0.0, 10.0, 10.0), bbox(0, 6.0, 0.0, 14.0, 10.0)]
        );
        assert_eq!(counters.overlap_removed, 1);
    }
}
