use glob::glob;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coco::{
    annotations_to_coco, coco_to_annotations, group_by_supercategory, read_coco_file, record_class, CocoFile,
};
use crate::config::{Args, LabelFormat, SanitizeConfig};
use crate::error::SanitizeError;
use crate::formats::{format_label_text, parse_class_id, parse_label_text, TextFormat};
use crate::pipeline::{sanitize_dataset, SanitizeReport};
use crate::types::{BoundingBox, Dataset, ImageAnnotation};
use crate::utils::{create_progress_bar, is_image_file, write_atomic};

/// Locations of one split on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPaths {
    pub name: String,
    pub images_dir: PathBuf,
    /// Label directory for the text formats.
    pub labels_dir: Option<PathBuf>,
    /// Annotation JSON for the COCO format.
    pub annotations_file: Option<PathBuf>,
}

/// A split read into memory, plus the file paths behind each id.
#[derive(Debug)]
pub struct LoadedSplit {
    pub dataset: Dataset,
    pub image_files: HashMap<String, Vec<PathBuf>>,
    pub label_files: HashMap<String, PathBuf>,
    /// Raw lines of each label file, so retained boxes are written back as read.
    pub source_lines: HashMap<String, Vec<String>>,
    /// Ids whose boxes changed class at load time.
    pub relabelled: BTreeSet<String>,
    pub coco: Option<CocoFile>,
    /// COCO records pointing at no listed image.
    pub dangling_records: usize,
    /// The COCO category list was replaced by supercategory groups.
    pub categories_regrouped: bool,
}

fn require_dir(path: PathBuf) -> Result<PathBuf, SanitizeError> {
    if path.is_dir() {
        Ok(path)
    } else {
        Err(SanitizeError::MissingDirectory { path })
    }
}

fn require_file(path: PathBuf) -> Result<PathBuf, SanitizeError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(SanitizeError::MissingDirectory { path })
    }
}

/// Resolve and check every requested split before any of them is touched.
pub fn resolve_splits(args: &Args) -> Result<Vec<SplitPaths>, SanitizeError> {
    let root = require_dir(PathBuf::from(&args.directory))?;
    let split_roots: Vec<(String, PathBuf)> = if args.splits.is_empty() {
        vec![(args.directory.clone(), root.clone())]
    } else {
        args.splits
            .iter()
            .map(|name| (name.clone(), root.join(name)))
            .collect()
    };

    split_roots
        .into_iter()
        .map(|(name, split_root)| {
            let split_root = require_dir(split_root)?;
            let images_dir = require_dir(split_root.join("images"))?;
            let (labels_dir, annotations_file) = match args.format {
                LabelFormat::Coco => (
                    None,
                    Some(require_file(split_root.join(&args.annotations_file))?),
                ),
                LabelFormat::Corner | LabelFormat::Yolo => {
                    (Some(require_dir(split_root.join("labels"))?), None)
                }
            };
            Ok(SplitPaths {
                name,
                images_dir,
                labels_dir,
                annotations_file,
            })
        })
        .collect()
}

fn text_format(format: LabelFormat) -> Option<TextFormat> {
    match format {
        LabelFormat::Corner => Some(TextFormat::Corner),
        LabelFormat::Yolo => Some(TextFormat::Yolo),
        LabelFormat::Coco => None,
    }
}

fn glob_paths(pattern: &Path) -> Result<Vec<PathBuf>, SanitizeError> {
    let pattern_str = pattern.to_string_lossy();
    let entries = glob(&pattern_str).map_err(|e| {
        SanitizeError::io(
            pattern,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        )
    })?;
    Ok(entries.filter_map(|entry| entry.ok()).collect())
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// List the images of a split keyed by id.
///
/// Text formats pair `images/<stem>.<ext>` with `labels/<stem>.txt`, so the
/// id is the file stem. COCO refers to images by path, so the id is the path
/// relative to `images/`.
pub fn list_images(images_dir: &Path, format: LabelFormat) -> Result<HashMap<String, Vec<PathBuf>>, SanitizeError> {
    let pattern = match format {
        LabelFormat::Coco => images_dir.join("**").join("*"),
        LabelFormat::Corner | LabelFormat::Yolo => images_dir.join("*"),
    };

    let mut images: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for path in glob_paths(&pattern)?
        .into_iter()
        .filter(|p| p.is_file() && is_image_file(p))
    {
        let id = match format {
            LabelFormat::Coco => path
                .strip_prefix(images_dir)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/")),
            LabelFormat::Corner | LabelFormat::Yolo => file_stem(&path),
        };
        if let Some(id) = id {
            images.entry(id).or_default().push(path);
        }
    }

    for (id, paths) in &images {
        if paths.len() > 1 {
            warn!("{} image files share the id {}: {:?}", paths.len(), id, paths);
        }
    }
    Ok(images)
}

struct TextLabel {
    annotation: ImageAnnotation,
    path: PathBuf,
    lines: Vec<String>,
    relabelled: bool,
}

fn source_class(bbox: &BoundingBox, lines: &[String]) -> Option<u32> {
    let line = lines.get(bbox.origin?)?;
    parse_class_id(line.split_whitespace().next()?)
}

fn load_text_labels(
    labels_dir: &Path,
    format: TextFormat,
    args: &Args,
    split_name: &str,
) -> Result<Vec<TextLabel>, SanitizeError> {
    let label_paths = glob_paths(&labels_dir.join("*.txt"))?;
    let (width, height) = format.canvas(args.img_width, args.img_height);
    let class_map = args.class_map();

    let pb = create_progress_bar(label_paths.len() as u64, &format!("{} labels", split_name));
    let labels = label_paths
        .par_iter()
        .filter_map(|path| file_stem(path).map(|id| (id, path)))
        .map(|(id, path)| {
            let bytes = fs::read(path).map_err(|e| SanitizeError::io(path, e))?;
            let text = String::from_utf8_lossy(&bytes);
            let annotation = parse_label_text(&id, &text, format, width, height, &class_map);
            for malformed in &annotation.malformed {
                debug!("{}: {}", path.display(), malformed);
            }
            let lines: Vec<String> = text.lines().map(str::to_string).collect();
            let relabelled = annotation
                .boxes
                .iter()
                .any(|bbox| source_class(bbox, &lines) != Some(bbox.class_id));
            pb.inc(1);
            Ok::<_, SanitizeError>(TextLabel {
                annotation,
                path: path.clone(),
                lines,
                relabelled,
            })
        })
        .collect::<Result<Vec<_>, SanitizeError>>()?;
    pb.finish_and_clear();
    Ok(labels)
}

/// Class mapping for a COCO split: the user mapping, applied after
/// supercategory grouping when that is requested.
fn coco_class_map(coco: &mut CocoFile, args: &Args) -> (HashMap<u32, u32>, bool) {
    let user_map = args.class_map();
    if !args.group_by_supercategory {
        return (user_map, false);
    }

    let (grouping, groups) = group_by_supercategory(&coco.categories);
    let mut class_map = user_map.clone();
    for (category_id, group_id) in grouping {
        class_map.insert(category_id, user_map.get(&group_id).copied().unwrap_or(group_id));
    }
    let regrouped = coco.categories != groups;
    if regrouped {
        info!(
            "Grouped {} categories into {} supercategories",
            coco.categories.len(),
            groups.len()
        );
        coco.categories = groups;
    }
    (class_map, regrouped)
}

/// Read one split into an in-memory dataset.
pub fn load_split(split: &SplitPaths, args: &Args) -> Result<LoadedSplit, SanitizeError> {
    let image_files = list_images(&split.images_dir, args.format)?;
    let mut dataset = Dataset::new();
    for id in image_files.keys() {
        dataset.insert_image(id.clone());
    }

    let mut loaded = LoadedSplit {
        dataset,
        image_files,
        label_files: HashMap::new(),
        source_lines: HashMap::new(),
        relabelled: BTreeSet::new(),
        coco: None,
        dangling_records: 0,
        categories_regrouped: false,
    };

    match (text_format(args.format), &split.labels_dir, &split.annotations_file) {
        (Some(format), Some(labels_dir), _) => {
            for label in load_text_labels(labels_dir, format, args, &split.name)? {
                let id = label.annotation.image_id.clone();
                if label.relabelled {
                    loaded.relabelled.insert(id.clone());
                }
                loaded.label_files.insert(id.clone(), label.path);
                loaded.source_lines.insert(id, label.lines);
                loaded.dataset.insert_annotation(label.annotation);
            }
        }
        (None, _, Some(annotations_file)) => {
            let mut coco = read_coco_file(annotations_file)?;
            let (class_map, regrouped) = coco_class_map(&mut coco, args);
            let parsed = coco_to_annotations(&coco, &class_map);
            for annotation in parsed.annotations {
                let relabelled = annotation.boxes.iter().any(|bbox| {
                    bbox.origin
                        .and_then(|i| coco.annotations.get(i))
                        .and_then(record_class)
                        != Some(bbox.class_id)
                });
                if relabelled {
                    loaded.relabelled.insert(annotation.image_id.clone());
                }
                loaded.dataset.insert_annotation(annotation);
            }
            if parsed.dangling_records > 0 {
                warn!(
                    "[{}] {} annotations reference no listed image and will be dropped",
                    split.name, parsed.dangling_records
                );
            }
            loaded.dangling_records = parsed.dangling_records;
            loaded.categories_regrouped = regrouped;
            loaded.coco = Some(coco);
        }
        _ => {
            let path = split.labels_dir.clone().unwrap_or_else(|| split.images_dir.clone());
            return Err(SanitizeError::MissingDirectory { path });
        }
    }

    info!(
        "[{}] Loaded {} images and {} label files ({} boxes)",
        split.name,
        loaded.dataset.image_ids.len(),
        loaded.dataset.annotations.len(),
        loaded.dataset.total_boxes()
    );

    Ok(loaded)
}

fn remove_files<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Result<usize, SanitizeError> {
    let mut removed = 0;
    for path in paths {
        fs::remove_file(path).map_err(|e| SanitizeError::io(path, e))?;
        removed += 1;
    }
    Ok(removed)
}

/// Apply a sanitization result to disk.
///
/// Changed label files are rewritten atomically; unchanged ones are left
/// byte-for-byte alone. Orphaned files are deleted only once every write
/// has succeeded, so a failed write leaves the split as it was.
pub fn commit_split(
    split: &SplitPaths,
    loaded: LoadedSplit,
    original: &BTreeMap<String, ImageAnnotation>,
    report: &SanitizeReport,
    format: LabelFormat,
) -> Result<(), SanitizeError> {
    let LoadedSplit {
        image_files,
        label_files,
        source_lines,
        relabelled,
        coco,
        categories_regrouped,
        ..
    } = loaded;
    let consistency = &report.consistency;

    let mut labels_removed = 0;
    match (text_format(format), coco, &split.annotations_file) {
        (Some(line_format), _, _) => {
            let changed: Vec<(&PathBuf, &ImageAnnotation, &[String])> = report
                .dataset
                .annotations
                .iter()
                .filter(|(id, annotation)| original.get(*id) != Some(*annotation) || relabelled.contains(*id))
                .filter_map(|(id, annotation)| {
                    let lines = source_lines.get(id).map(Vec::as_slice).unwrap_or(&[]);
                    label_files.get(id).map(|path| (path, annotation, lines))
                })
                .collect();

            let pb = create_progress_bar(changed.len() as u64, &format!("{} write", split.name));
            changed.par_iter().try_for_each(|(path, annotation, lines)| {
                write_atomic(path, format_label_text(annotation, line_format, lines).as_bytes())
                    .map_err(|e| SanitizeError::io(*path, e))?;
                pb.inc(1);
                Ok::<(), SanitizeError>(())
            })?;
            pb.finish_and_clear();

            let dropped_labels = consistency
                .orphan_labels
                .iter()
                .chain(&consistency.empty_images)
                .filter_map(|id| label_files.get(id));
            labels_removed = remove_files(dropped_labels)?;

            info!("[{}] Rewrote {} label files", split.name, changed.len());
        }
        (None, Some(coco), Some(annotations_file)) => {
            if report.counters.is_zero() && relabelled.is_empty() && !categories_regrouped {
                info!("[{}] Nothing to change in {}", split.name, annotations_file.display());
            } else {
                let rebuilt = annotations_to_coco(coco, &report.dataset);
                let json = serde_json::to_vec(&rebuilt).map_err(|source| SanitizeError::Json {
                    path: annotations_file.clone(),
                    source,
                })?;
                write_atomic(annotations_file, &json).map_err(|e| SanitizeError::io(annotations_file, e))?;
                info!(
                    "[{}] Wrote {} ({} images, {} annotations)",
                    split.name,
                    annotations_file.display(),
                    rebuilt.images.len(),
                    rebuilt.annotations.len()
                );
            }
        }
        _ => {}
    }

    let dropped_images = consistency
        .orphan_images
        .iter()
        .chain(&consistency.empty_images)
        .filter_map(|id| image_files.get(id))
        .flatten();
    let images_removed = remove_files(dropped_images)?;

    info!(
        "[{}] Deleted {} label files and {} images",
        split.name, labels_removed, images_removed
    );
    Ok(())
}

/// Load, sanitize and, unless `args.dry_run` is set, commit one split.
pub fn sanitize_split(
    split: &SplitPaths,
    args: &Args,
    config: &SanitizeConfig,
) -> Result<SanitizeReport, SanitizeError> {
    let mut loaded = load_split(split, args)?;
    let original = loaded.dataset.annotations.clone();
    let mut report = sanitize_dataset(std::mem::take(&mut loaded.dataset), config)?;
    report.counters.orphan_labels_removed += loaded.dangling_records;

    if args.dry_run {
        info!("[{}] Dry run, leaving files untouched", split.name);
    } else {
        commit_split(split, loaded, &original, &report, args.format)?;
    }
    Ok(report)
}
