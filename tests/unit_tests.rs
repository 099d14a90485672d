use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use labelclean::geometry::{area, iou};
use labelclean::{sanitize_dataset, BoundingBox, Counters, Dataset, ImageAnnotation, SanitizeConfig};

fn config(seed: u64) -> SanitizeConfig {
    SanitizeConfig {
        random_seed: Some(seed),
        ..SanitizeConfig::default()
    }
}

/// A noisy dataset: out-of-bounds, tiny, duplicated and dense boxes, plus
/// orphans on both sides.
fn noisy_dataset(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut dataset = Dataset::new();

    for i in 0..50 {
        let id = format!("img_{:03}", i);
        let (width, height) = (480u32, 640u32);
        let count = rng.gen_range(0..60);
        let mut boxes = Vec::with_capacity(count);
        for _ in 0..count {
            let x_min = rng.gen_range(-20.0..500.0);
            let y_min = rng.gen_range(-20.0..660.0);
            let w = rng.gen_range(0.5..200.0);
            let h = rng.gen_range(0.5..200.0);
            let bbox = BoundingBox::new(rng.gen_range(0..4), x_min, y_min, x_min + w, y_min + h);
            boxes.push(bbox);
            if rng.gen_bool(0.2) {
                // Near-duplicate of the same object
                boxes.push(BoundingBox::new(bbox.class_id, x_min + 1.0, y_min + 1.0, x_min + w, y_min + h));
            }
        }
        dataset.insert_annotation(ImageAnnotation::new(id.clone(), width, height, boxes));
        if i % 10 != 3 {
            dataset.insert_image(id);
        }
    }
    dataset.insert_image("image_without_label");
    dataset
}

#[test]
fn test_overlap_scenario() {
    let mut dataset = Dataset::new();
    dataset.insert_annotation(ImageAnnotation::new(
        "img",
        480,
        640,
        vec![
            BoundingBox::new(0, 0.0, 0.0, 100.0, 100.0),
            BoundingBox::new(0, 5.0, 5.0, 105.0, 105.0),
            BoundingBox::new(1, 0.0, 0.0, 50.0, 50.0),
        ],
    ));
    dataset.insert_image("img");

    let report = sanitize_dataset(dataset, &config(42)).unwrap();

    assert_eq!(
        report.dataset.annotations["img"].boxes,
        vec![
            BoundingBox::new(0, 0.0, 0.0, 100.0, 100.0),
            BoundingBox::new(1, 0.0, 0.0, 50.0, 50.0),
        ]
    );
    assert_eq!(report.counters.overlap_removed, 1);
    assert_eq!(report.counters.boxes_removed(), 1);
}

#[test]
fn test_min_area_scenario() {
    let mut dataset = Dataset::new();
    dataset.insert_annotation(ImageAnnotation::new(
        "img",
        100,
        100,
        vec![
            BoundingBox::new(0, 0.0, 0.0, 5.0, 1.0),
            BoundingBox::new(0, 50.0, 50.0, 60.0, 52.0),
        ],
    ));
    dataset.insert_image("img");

    let config = SanitizeConfig {
        min_area_ratio: 0.001,
        ..config(1)
    };
    let report = sanitize_dataset(dataset, &config).unwrap();

    assert_eq!(
        report.dataset.annotations["img"].boxes,
        vec![BoundingBox::new(0, 50.0, 50.0, 60.0, 52.0)]
    );
    assert_eq!(report.counters.small_removed, 1);
}

#[test]
fn test_density_cap_scenario_is_reproducible() {
    let build = || {
        let boxes = (0..40)
            .map(|i| {
                let x = (i % 8) as f64 * 60.0;
                let y = (i / 8) as f64 * 120.0;
                BoundingBox::new(i as u32, x, y, x + 50.0, y + 100.0)
            })
            .collect();
        let mut dataset = Dataset::new();
        dataset.insert_annotation(ImageAnnotation::new("dense", 480, 640, boxes));
        dataset.insert_image("dense");
        dataset
    };

    let first = sanitize_dataset(build(), &config(1234)).unwrap();
    let second = sanitize_dataset(build(), &config(1234)).unwrap();

    assert_eq!(first.dataset.annotations["dense"].boxes.len(), 30);
    assert_eq!(first.counters.density_capped_removed, 10);
    assert_eq!(
        first.dataset.annotations["dense"].boxes,
        second.dataset.annotations["dense"].boxes
    );
}

#[test]
fn test_empty_label_is_not_an_orphan() {
    let mut dataset = Dataset::new();
    dataset.insert_annotation(ImageAnnotation::new(
        "img1",
        100,
        100,
        vec![BoundingBox::new(0, -5.0, 0.0, 10.0, 10.0)],
    ));
    dataset.insert_image("img1");
    dataset.insert_image("img2");

    let report = sanitize_dataset(dataset, &config(3)).unwrap();

    assert!(report.dataset.image_ids.contains("img1"));
    assert!(report.dataset.annotations["img1"].boxes.is_empty());
    assert!(!report.dataset.image_ids.contains("img2"));
    assert_eq!(report.counters.orphan_images_removed, 1);
    assert_eq!(report.counters.invalid_removed, 1);
    assert_eq!(report.consistency.orphan_images, vec!["img2"]);
}

#[test]
fn test_drop_empty_images_policy() {
    let mut dataset = Dataset::new();
    dataset.insert_annotation(ImageAnnotation::new(
        "img1",
        100,
        100,
        vec![BoundingBox::new(0, -5.0, 0.0, 10.0, 10.0)],
    ));
    dataset.insert_image("img1");

    let config = SanitizeConfig {
        drop_empty_images: true,
        ..config(3)
    };
    let report = sanitize_dataset(dataset, &config).unwrap();

    assert!(report.dataset.image_ids.is_empty());
    assert!(report.dataset.annotations.is_empty());
    assert_eq!(report.counters.empty_images_removed, 1);
}

#[test]
fn test_no_cross_class_suppression() {
    let mut dataset = Dataset::new();
    dataset.insert_annotation(ImageAnnotation::new(
        "img",
        100,
        100,
        vec![
            BoundingBox::new(0, 10.0, 10.0, 60.0, 60.0),
            BoundingBox::new(1, 10.0, 10.0, 60.0, 60.0),
        ],
    ));
    dataset.insert_image("img");

    let report = sanitize_dataset(dataset, &config(5)).unwrap();
    assert_eq!(report.dataset.annotations["img"].boxes.len(), 2);
    assert_eq!(report.counters.overlap_removed, 0);
}

#[test]
fn test_invariants_hold_on_noisy_data() {
    let config = config(2024);
    let report = sanitize_dataset(noisy_dataset(7), &config).unwrap();

    assert_eq!(report.dataset.image_ids, report.dataset.label_ids());
    assert_eq!(report.counters.orphan_images_removed, 1);
    assert_eq!(report.counters.orphan_labels_removed, 5);

    for annotation in report.dataset.annotations.values() {
        assert!(annotation.boxes.len() <= config.max_box_count);
        for (i, a) in annotation.boxes.iter().enumerate() {
            assert!(a.x_min >= 0.0 && a.y_min >= 0.0);
            assert!(a.x_max <= annotation.width as f64 && a.y_max <= annotation.height as f64);
            assert!(area(a) / annotation.image_area() >= config.min_area_ratio);
            for b in &annotation.boxes[i + 1..] {
                if a.class_id == b.class_id {
                    assert!(iou(a, b) <= config.max_iou);
                }
            }
        }
    }
}

#[test]
fn test_idempotent_on_clean_input() {
    let config = config(99);
    let first = sanitize_dataset(noisy_dataset(11), &config).unwrap();
    assert!(!first.counters.is_zero());

    let second = sanitize_dataset(first.dataset.clone(), &config).unwrap();
    assert_eq!(second.counters, Counters::default());
    assert_eq!(second.dataset, first.dataset);
}

#[test]
fn test_parallel_run_is_deterministic_under_fixed_seed() {
    let first = sanitize_dataset(noisy_dataset(21), &config(8)).unwrap();
    let second = sanitize_dataset(noisy_dataset(21), &config(8)).unwrap();
    assert_eq!(first.dataset, second.dataset);
    assert_eq!(first.counters, second.counters);
}
