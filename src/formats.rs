//! Line-oriented label encodings and their conversion to [`BoundingBox`].

use std::collections::HashMap;

use crate::error::MalformedBoxError;
use crate::types::{BoundingBox, ImageAnnotation};

/// One-box-per-line text encodings.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TextFormat {
    /// `class x_min y_min x_max y_max`, pixel units.
    Corner,
    /// `class x_center y_center width height`, normalized to the unit square.
    Yolo,
}

impl TextFormat {
    /// Dimensions of the coordinate space boxes of this format live in.
    ///
    /// Normalized boxes stay in the unit square: IoU and area ratio do not
    /// change under per-axis scaling, so no pixel conversion is needed.
    pub fn canvas(self, img_width: u32, img_height: u32) -> (u32, u32) {
        match self {
            TextFormat::Corner => (img_width, img_height),
            TextFormat::Yolo => (1, 1),
        }
    }
}

/// Parse a class id written either as an integer or an integral float.
pub fn parse_class_id(field: &str) -> Option<u32> {
    if let Ok(id) = field.parse::<u32>() {
        return Some(id);
    }
    let value = field.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Some(value as u32)
    } else {
        None
    }
}

/// Parse one label line into a box in canonical corner form.
pub fn parse_label_line(line: &str, line_no: usize, format: TextFormat) -> Result<BoundingBox, MalformedBoxError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(MalformedBoxError::new(
            line_no,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    }

    let class_id = parse_class_id(fields[0])
        .ok_or_else(|| MalformedBoxError::new(line_no, format!("invalid class id '{}'", fields[0])))?;

    let mut coords = [0.0f64; 4];
    for (slot, field) in coords.iter_mut().zip(&fields[1..]) {
        let value = field
            .parse::<f64>()
            .map_err(|_| MalformedBoxError::new(line_no, format!("invalid coordinate '{}'", field)))?;
        if !value.is_finite() {
            return Err(MalformedBoxError::new(
                line_no,
                format!("non-finite coordinate '{}'", field),
            ));
        }
        *slot = value;
    }

    let [a, b, c, d] = coords;
    Ok(match format {
        TextFormat::Corner => BoundingBox::new(class_id, a, b, c, d),
        TextFormat::Yolo => BoundingBox::from_center(class_id, a, b, c, d),
    })
}

/// Parse a whole label file. Bad lines are kept aside as malformed records.
pub fn parse_label_text(
    image_id: &str,
    text: &str,
    format: TextFormat,
    width: u32,
    height: u32,
    class_map: &HashMap<u32, u32>,
) -> ImageAnnotation {
    let mut annotation = ImageAnnotation::new(image_id, width, height, Vec::new());
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_label_line(line, index + 1, format) {
            Ok(mut bbox) => {
                if let Some(&class_id) = class_map.get(&bbox.class_id) {
                    bbox.class_id = class_id;
                }
                annotation.boxes.push(bbox.with_origin(index));
            }
            Err(e) => annotation.malformed.push(e),
        }
    }
    annotation
}

/// Render one box as a label line, without the trailing newline.
pub fn format_label_line(bbox: &BoundingBox, format: TextFormat) -> String {
    match format {
        TextFormat::Corner => format!(
            "{} {} {} {} {}",
            bbox.class_id, bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max
        ),
        TextFormat::Yolo => {
            let x_center = (bbox.x_min + bbox.x_max) / 2.0;
            let y_center = (bbox.y_min + bbox.y_max) / 2.0;
            format!(
                "{} {:.6} {:.6} {:.6} {:.6}",
                bbox.class_id,
                x_center,
                y_center,
                bbox.width(),
                bbox.height()
            )
        }
    }
}

/// Re-emit a source line with its coordinate fields untouched.
///
/// Only the class token is rewritten, so a remapped class does not round
/// the coordinates of a box that was kept as read.
pub fn retag_label_line(line: &str, class_id: u32) -> String {
    let mut fields = line.split_whitespace();
    fields.next();
    let mut retagged = class_id.to_string();
    for field in fields {
        retagged.push(' ');
        retagged.push_str(field);
    }
    retagged
}

/// Render the boxes of an annotation as label file contents.
///
/// Boxes that came from `source_lines` are written from their source text;
/// only boxes without an origin are formatted from their coordinates.
pub fn format_label_text(annotation: &ImageAnnotation, format: TextFormat, source_lines: &[String]) -> String {
    let mut data = String::with_capacity(annotation.boxes.len() * 48);
    for bbox in &annotation.boxes {
        match bbox.origin.and_then(|i| source_lines.get(i)) {
            Some(line) => data.push_str(&retag_label_line(line, bbox.class_id)),
            None => data.push_str(&format_label_line(bbox, format)),
        }
        data.push('\n');
    }
    data
}
