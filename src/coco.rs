//! COCO format data structures and conversion to and from the sanitizer model.
//!
//! Only the fields the pipeline needs are typed. Everything else on images and
//! annotations is carried through untouched, so a sanitized file keeps the
//! metadata of the original.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{MalformedBoxError, SanitizeError};
use crate::formats::parse_class_id;
use crate::types::{BoundingBox, Dataset, ImageAnnotation};

/// COCO category information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub supercategory: String,
}

/// COCO image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Image {
    pub fn new(id: u64, file_name: String, width: u32, height: u32) -> Self {
        Self {
            id,
            file_name,
            width,
            height,
            extra: Map::new(),
        }
    }

    /// Id used for this image in the sanitizer model: its path under `images/`.
    pub fn key(&self) -> String {
        self.file_name.replace('\\', "/")
    }
}

/// COCO annotation information
///
/// Every field is loosely typed: a broken record is classified as a malformed
/// box instead of failing the whole file. `area`, `iscrowd`, `segmentation`
/// and anything else ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub image_id: Value,
    #[serde(default)]
    pub category_id: Value,
    #[serde(default)]
    pub bbox: Value, // [x, y, width, height]
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Annotation {
    /// A fresh record for a box that has no source record.
    pub fn from_box(id: u64, image_id: u64, bbox: &BoundingBox) -> Self {
        let mut extra = Map::new();
        extra.insert("area".to_string(), Value::from(bbox.width() * bbox.height()));
        extra.insert("iscrowd".to_string(), Value::from(0));
        Self {
            id: Value::from(id),
            image_id: Value::from(image_id),
            category_id: Value::from(bbox.class_id),
            bbox: Value::Array(vec![
                Value::from(bbox.x_min),
                Value::from(bbox.y_min),
                Value::from(bbox.width()),
                Value::from(bbox.height()),
            ]),
            extra,
        }
    }

    /// Id of the image this record belongs to, if it is a valid integer.
    pub fn image_key(&self) -> Option<u64> {
        self.image_id.as_u64()
    }
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(default)]
    pub licenses: Vec<Value>,
    #[serde(default)]
    pub categories: Vec<Category>,
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Read and parse a COCO annotation file from a buffered stream.
pub fn read_coco_file(path: &Path) -> Result<CocoFile, SanitizeError> {
    let file = File::open(path).map_err(|e| SanitizeError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| SanitizeError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Class id written on a record, if it is a valid one.
pub fn record_class(annotation: &Annotation) -> Option<u32> {
    match &annotation.category_id {
        Value::Number(n) => parse_class_id(&n.to_string()),
        Value::String(s) => parse_class_id(s.trim()),
        _ => None,
    }
}

/// Convert a COCO record into a corner-form box.
pub fn parse_coco_bbox(annotation: &Annotation, record_no: usize) -> Result<BoundingBox, MalformedBoxError> {
    let class_id = record_class(annotation).ok_or_else(|| {
        MalformedBoxError::new(
            record_no,
            format!("annotation {}: invalid category_id {}", annotation.id, annotation.category_id),
        )
    })?;

    let raw = match &annotation.bbox {
        Value::Array(values) if values.len() == 4 => values,
        Value::Array(values) => {
            return Err(MalformedBoxError::new(
                record_no,
                format!("annotation {}: expected 4 bbox values, found {}", annotation.id, values.len()),
            ))
        }
        Value::Null => {
            return Err(MalformedBoxError::new(
                record_no,
                format!("annotation {}: no bbox", annotation.id),
            ))
        }
        other => {
            return Err(MalformedBoxError::new(
                record_no,
                format!("annotation {}: bbox is not an array: {}", annotation.id, other),
            ))
        }
    };

    let mut values = [0.0f64; 4];
    for (slot, value) in values.iter_mut().zip(raw) {
        *slot = coordinate(value)
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                MalformedBoxError::new(
                    record_no,
                    format!("annotation {}: invalid bbox value {}", annotation.id, value),
                )
            })?;
    }

    let [x, y, w, h] = values;
    Ok(BoundingBox::from_xywh(class_id, x, y, w, h))
}

/// Per-image annotations read from a COCO file.
#[derive(Debug, Default)]
pub struct CocoAnnotations {
    pub annotations: Vec<ImageAnnotation>,
    /// Records whose `image_id` matches no listed image. They cannot be
    /// sanitized and are not written back.
    pub dangling_records: usize,
}

/// Build per-image annotations from a COCO file, keyed by [`Image::key`].
///
/// Every image entry yields an annotation, even with no boxes: its presence
/// in the file is what makes it a labelled image. Each box keeps the index
/// of its record as origin.
pub fn coco_to_annotations(coco: &CocoFile, class_map: &HashMap<u32, u32>) -> CocoAnnotations {
    let mut by_image: BTreeMap<u64, ImageAnnotation> = coco
        .images
        .iter()
        .map(|image| {
            (
                image.id,
                ImageAnnotation::new(image.key(), image.width, image.height, Vec::new()),
            )
        })
        .collect();

    let mut dangling_records = 0;
    for (index, record) in coco.annotations.iter().enumerate() {
        let Some(target) = record.image_key().and_then(|id| by_image.get_mut(&id)) else {
            log::warn!(
                "Annotation {} references unknown image id {}",
                record.id,
                record.image_id
            );
            dangling_records += 1;
            continue;
        };
        match parse_coco_bbox(record, index + 1) {
            Ok(mut bbox) => {
                if let Some(&class_id) = class_map.get(&bbox.class_id) {
                    bbox.class_id = class_id;
                }
                target.boxes.push(bbox.with_origin(index));
            }
            Err(e) => target.malformed.push(e),
        }
    }

    CocoAnnotations {
        annotations: by_image.into_values().collect(),
        dangling_records,
    }
}

/// Map every category id to the index of its supercategory.
///
/// Supercategories are numbered from 0 in order of first appearance; a
/// category without one forms its own group. Returns the mapping and the
/// replacement category list.
pub fn group_by_supercategory(categories: &[Category]) -> (HashMap<u32, u32>, Vec<Category>) {
    let mut groups: Vec<Category> = Vec::new();
    let mut mapping = HashMap::with_capacity(categories.len());
    for category in categories {
        let group = if category.supercategory.is_empty() {
            &category.name
        } else {
            &category.supercategory
        };
        let group_id = match groups.iter().position(|g| &g.name == group) {
            Some(position) => position as u32,
            None => {
                let id = groups.len() as u32;
                groups.push(Category {
                    id,
                    name: group.clone(),
                    supercategory: group.clone(),
                });
                id
            }
        };
        mapping.insert(category.id, group_id);
    }
    (mapping, groups)
}

/// Rebuild a COCO file from the retained images of a sanitized dataset.
///
/// Image entries not retained are dropped. A kept box is written back from
/// its source record, with only `category_id` updated when it was remapped;
/// boxes without a source record get fresh ids after the largest existing one.
pub fn annotations_to_coco(original: CocoFile, dataset: &Dataset) -> CocoFile {
    let CocoFile {
        info,
        licenses,
        categories,
        images,
        annotations: records,
    } = original;

    let images: Vec<Image> = images
        .into_iter()
        .filter(|image| dataset.annotations.contains_key(&image.key()))
        .collect();

    let mut next_id = records
        .iter()
        .filter_map(|record| record.id.as_u64())
        .max()
        .map_or(1, |max| max + 1);
    let mut annotations = Vec::with_capacity(dataset.total_boxes());
    for image in &images {
        let Some(annotation) = dataset.annotations.get(&image.key()) else {
            continue;
        };
        for bbox in &annotation.boxes {
            match bbox.origin.and_then(|i| records.get(i)) {
                Some(record) => {
                    let mut record = record.clone();
                    if record_class(&record) != Some(bbox.class_id) {
                        record.category_id = Value::from(bbox.class_id);
                    }
                    annotations.push(record);
                }
                None => {
                    annotations.push(Annotation::from_box(next_id, image.id, bbox));
                    next_id += 1;
                }
            }
        }
    }

    CocoFile {
        info,
        licenses,
        categories,
        images,
        annotations,
    }
}
