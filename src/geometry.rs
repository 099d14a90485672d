//! Area and overlap predicates over [`BoundingBox`] values.

use crate::types::BoundingBox;

/// Area of a box; inverted extents count as zero.
pub fn area(b: &BoundingBox) -> f64 {
    (b.x_max - b.x_min).max(0.0) * (b.y_max - b.y_min).max(0.0)
}

/// Area shared by two boxes, zero when they are disjoint on either axis.
pub fn intersection_area(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let ox = (a.x_max.min(b.x_max) - a.x_min.max(b.x_min)).max(0.0);
    let oy = (a.y_max.min(b.y_max) - a.y_min.max(b.y_min)).max(0.0);
    ox * oy
}

/// Intersection over union.
///
/// Returns 0.0 when the union is empty: two degenerate boxes are never
/// considered overlapping.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let intersection = intersection_area(a, b);
    let union = area(a) + area(b) - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> BoundingBox {
        BoundingBox::new(0, x_min, y_min, x_max, y_max)
    }

    #[test]
    fn test_area() {
        assert_eq!(area(&bbox(0.0, 0.0, 10.0, 5.0)), 50.0);
        assert_eq!(area(&bbox(10.0, 0.0, 0.0, 5.0)), 0.0);
    }

    #[test]
    fn test_intersection_area() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        let b = bbox(5.0, 5.0, 105.0, 105.0);
        assert_eq!(intersection_area(&a, &b), 9025.0);
        assert_eq!(intersection_area(&b, &a), 9025.0);

        // Touching edges share no area
        let c = bbox(100.0, 0.0, 200.0, 100.0);
        assert_eq!(intersection_area(&a, &c), 0.0);
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        let b = bbox(5.0, 5.0, 105.0, 105.0);
        let expected = 9025.0 / 10975.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-12);
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn test_iou_degenerate_is_zero() {
        let a = bbox(3.0, 3.0, 3.0, 3.0);
        assert_eq!(iou(&a, &a), 0.0);
        let line = bbox(0.0, 0.0, 10.0, 0.0);
        assert_eq!(iou(&line, &a), 0.0);
    }
}
