use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::SanitizeError;

/// Thresholds and policies for one sanitization run.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizeConfig {
    /// Upper bound on boxes kept per image.
    pub max_box_count: usize,
    /// Minimum box area as a fraction of image area.
    pub min_area_ratio: f64,
    /// Same-class pairs above this IoU lose their smaller box.
    pub max_iou: f64,
    /// Base seed for density sampling; drawn at random when unset.
    pub random_seed: Option<u64>,
    /// Treat images whose boxes were all filtered out as orphans.
    pub drop_empty_images: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            max_box_count: 30,
            min_area_ratio: 0.00015,
            max_iou: 0.35,
            random_seed: None,
            drop_empty_images: false,
        }
    }
}

impl SanitizeConfig {
    /// Reject thresholds the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), SanitizeError> {
        if self.max_box_count == 0 {
            return Err(SanitizeError::InvalidConfiguration(
                "max_box_count must be greater than 0".to_string(),
            ));
        }
        if self.min_area_ratio >= 1.0 && self.min_area_ratio.is_finite() {
            return Err(SanitizeError::InvalidConfiguration(format!(
                "min_area_ratio {} looks like a pixel area; expected a fraction of image area in (0, 1)",
                self.min_area_ratio
            )));
        }
        if !in_open_unit_interval(self.min_area_ratio) {
            return Err(SanitizeError::InvalidConfiguration(format!(
                "min_area_ratio must be in (0, 1), got {}",
                self.min_area_ratio
            )));
        }
        if !in_open_unit_interval(self.max_iou) {
            return Err(SanitizeError::InvalidConfiguration(format!(
                "max_iou must be in (0, 1), got {}",
                self.max_iou
            )));
        }
        Ok(())
    }
}

fn in_open_unit_interval(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value < 1.0
}

/// Command-line arguments for sanitizing a detection dataset in place.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Dataset root directory
    #[arg(short = 'd', long = "directory")]
    pub directory: String,

    /// Split subdirectories to sanitize (defaults to the root itself)
    #[arg(long = "splits", value_delimiter = ',')]
    pub splits: Vec<String>,

    /// Label encoding: 'corner', 'yolo' or 'coco'
    #[arg(long = "format", value_enum, default_value = "yolo")]
    pub format: LabelFormat,

    /// Image width in pixels, used by the corner format
    #[arg(long = "img_width", default_value_t = 480, value_parser = clap::value_parser!(u32).range(1..))]
    pub img_width: u32,

    /// Image height in pixels, used by the corner format
    #[arg(long = "img_height", default_value_t = 640, value_parser = clap::value_parser!(u32).range(1..))]
    pub img_height: u32,

    /// Maximum number of boxes kept per image
    #[arg(long = "max_box_count", default_value_t = 30)]
    pub max_box_count: usize,

    /// Minimum box area as a fraction of the image area
    #[arg(long = "min_area_ratio", default_value_t = 0.00015, value_parser = validate_ratio)]
    pub min_area_ratio: f64,

    /// Maximum IoU between two boxes of the same class
    #[arg(long = "max_iou", default_value_t = 0.35, value_parser = validate_ratio)]
    pub max_iou: f64,

    /// Seed for density sampling
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Remove images whose boxes were all filtered out
    #[arg(long = "drop_empty_images")]
    pub drop_empty_images: bool,

    /// Class id remapping as OLD:NEW pairs
    #[arg(long = "class_map", value_delimiter = ',', value_parser = parse_class_mapping)]
    pub class_map: Vec<(u32, u32)>,

    /// Annotation file name inside each split, used by the coco format
    #[arg(long = "annotations_file", default_value = "annotations.json")]
    pub annotations_file: String,

    /// Merge COCO categories into one class per supercategory
    #[arg(long = "group_by_supercategory")]
    pub group_by_supercategory: bool,

    /// Report what would be removed without touching any file
    #[arg(long = "dry_run")]
    pub dry_run: bool,
}

impl Args {
    pub fn to_sanitize_config(&self) -> Result<SanitizeConfig, SanitizeError> {
        if self.group_by_supercategory && self.format != LabelFormat::Coco {
            return Err(SanitizeError::InvalidConfiguration(
                "--group_by_supercategory needs --format coco".to_string(),
            ));
        }
        let config = SanitizeConfig {
            max_box_count: self.max_box_count,
            min_area_ratio: self.min_area_ratio,
            max_iou: self.max_iou,
            random_seed: self.seed,
            drop_empty_images: self.drop_empty_images,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn class_map(&self) -> HashMap<u32, u32> {
        self.class_map.iter().copied().collect()
    }
}

// Enumeration for the on-disk label encoding
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LabelFormat {
    /// `class x_min y_min x_max y_max` in pixels
    Corner,
    /// `class x_center y_center width height`, normalized
    Yolo,
    /// COCO JSON with `[x, y, width, height]` boxes in pixels
    Coco,
}

// Validate that the ratio is strictly between 0.0 and 1.0
fn validate_ratio(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if val > 0.0 && val < 1.0 => Ok(val),
        _ => Err("RATIO must be strictly between 0.0 and 1.0".to_string()),
    }
}

fn parse_class_mapping(s: &str) -> Result<(u32, u32), String> {
    let (from, to) = s
        .split_once(':')
        .ok_or_else(|| format!("expected OLD:NEW, got '{}'", s))?;
    let from = from
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid class id '{}': {}", from, e))?;
    let to = to
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid class id '{}': {}", to, e))?;
    Ok((from, to))
}
