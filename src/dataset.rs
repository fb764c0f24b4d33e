//! Loading labelled images from disk.
//!
//! Two layouts are supported:
//! - directory inferred: `<root>/<class>/*.jpg`, label is the index of the class directory in
//!   sorted order.
//! - annotation table: `annotations.csv` rows paired with `images/<filename>`.

use crate::error::{Error, Result};
use crate::i3m::{Annotation, AnnotationRow};
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fraction of the annotation table that is held out for validation.
pub const VALIDATION_FRACTION: f64 = 0.2;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    /// Parses the `H W` pair given on the command line.
    pub fn from_pair(v: &[u32]) -> Result<Self> {
        match v {
            [h, w] if *h > 0 && *w > 0 => Ok(Self::new(*h, *w)),
            _ => Err(Error::InvalidArgument(format!(
                "image size must be two positive integers, got {v:?}"
            ))),
        }
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(224, 224)
    }
}

/// A decoded image resized to the training resolution, with its binary label.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: RgbImage,
    pub label: u8,
}

#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
}

impl Split {
    /// Fails when either side has no samples.
    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.train.is_empty() {
            return Err(Error::EmptySplit { split: "training" });
        }
        if self.validation.is_empty() {
            return Err(Error::EmptySplit {
                split: "validation",
            });
        }
        Ok(())
    }
}

pub fn load_image(path: &Path, size: ImageSize) -> Result<RgbImage> {
    let img = image::open(path).map_err(|source| Error::Image {
        path: path.to_owned(),
        source,
    })?;
    Ok(img
        .resize_exact(
            size.width,
            size.height,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8())
}

/// Decodes all (path, label) pairs in parallel, the first failure aborts.
pub fn load_samples(entries: &[(PathBuf, u8)], size: ImageSize) -> Result<Vec<Sample>> {
    entries
        .par_iter()
        .map(|(path, label)| {
            Ok(Sample {
                image: load_image(path, size)?,
                label: *label,
            })
        })
        .collect()
}

fn sorted_dir_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::MissingDirectory {
            path: dir.to_owned(),
        });
    }
    let mut entries = vec![];
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Scans `<dir>/<class>/*` and returns the image paths with inferred labels, plus the class
/// names in label order.
pub fn scan_class_dirs(dir: &Path) -> Result<(Vec<(PathBuf, u8)>, Vec<String>)> {
    let class_dirs = sorted_dir_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();
    let class_names = class_dirs
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();
    if class_dirs.len() != 2 {
        return Err(Error::ClassCount {
            path: dir.to_owned(),
            found: class_names,
        });
    }

    let mut entries = vec![];
    for (label, class_dir) in class_dirs.iter().enumerate() {
        for path in sorted_dir_entries(class_dir)? {
            if path.is_file() && is_image(&path) {
                entries.push((path, label as u8));
            }
        }
    }
    Ok((entries, class_names))
}

/// Loads one directory-inferred dataset, e.g. `data_dir/train`.
pub fn load_class_dir(dir: &Path, size: ImageSize) -> Result<(Vec<Sample>, Vec<String>)> {
    let (entries, class_names) = scan_class_dirs(dir)?;
    log::info!(
        "Found {} images in {} belonging to classes {:?}",
        entries.len(),
        dir.display(),
        class_names
    );
    Ok((load_samples(&entries, size)?, class_names))
}

/// Split policy for directory-inferred tasks: `train/` and `validation/` are used as-is.
pub fn load_directory_split(data_dir: &Path, size: ImageSize) -> Result<Split> {
    let (train, train_classes) = load_class_dir(&data_dir.join("train"), size)?;
    let (validation, val_classes) = load_class_dir(&data_dir.join("validation"), size)?;
    if train_classes != val_classes {
        log::warn!(
            "class directories differ between train {train_classes:?} and validation {val_classes:?}"
        );
    }
    Ok(Split { train, validation })
}

pub fn read_annotations(path: &Path) -> Result<Vec<Annotation>> {
    let csv_err = |source| Error::Csv {
        path: path.to_owned(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    let mut annotations = vec![];
    for row in reader.deserialize::<AnnotationRow>() {
        annotations.push(row.map_err(csv_err)?.into());
    }
    Ok(annotations)
}

/// Number of leading records used for validation.
pub fn validation_count(total: usize) -> usize {
    (VALIDATION_FRACTION * total as f64).floor() as usize
}

/// Split policy for the annotation table: the first 20% of records, in file order, validate.
pub fn split_head<T>(mut records: Vec<T>) -> (Vec<T>, Vec<T>) {
    let train = records.split_off(validation_count(records.len()));
    (train, records)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Writes a small image with a flat colour, the file type follows the extension.
    pub(crate) fn write_image(path: &Path, color: [u8; 3]) {
        let img = RgbImage::from_pixel(20, 12, image::Rgb(color));
        img.save(path).unwrap();
    }

    pub(crate) fn write_class_tree(root: &Path, classes: &[(&str, usize)]) {
        for (class, count) in classes {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..*count {
                let shade = if class.starts_with('b') { 200 } else { 30 };
                write_image(&dir.join(format!("{i:03}.png")), [shade, shade, shade]);
            }
        }
    }

    #[test]
    fn test_image_size_pair() {
        assert_eq!(ImageSize::from_pair(&[32, 48]).unwrap(), ImageSize::new(32, 48));
        assert!(ImageSize::from_pair(&[32]).is_err());
        assert!(ImageSize::from_pair(&[0, 4]).is_err());
    }

    #[test]
    fn test_directory_split_uses_existing_dirs() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write_class_tree(&tmp.path().join("train"), &[("benign", 4), ("malignant", 6)]);
        write_class_tree(&tmp.path().join("validation"), &[("benign", 2), ("malignant", 1)]);
        // Non image files are skipped.
        std::fs::write(tmp.path().join("train/benign/notes.txt"), "x")?;

        let split = load_directory_split(tmp.path(), ImageSize::new(8, 10))?;
        assert_eq!(split.train.len(), 10);
        assert_eq!(split.validation.len(), 3);
        assert_eq!(split.train.iter().filter(|s| s.label == 1).count(), 6);
        assert_eq!(split.validation.iter().filter(|s| s.label == 0).count(), 2);
        assert_eq!(split.train[0].image.dimensions(), (10, 8));
        // Labels follow sorted class names, benign is brighter in the fixture.
        assert!(split.train[0].image.get_pixel(0, 0).0[0] > 150);
        Ok(())
    }

    #[test]
    fn test_class_count_and_missing_dir() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write_class_tree(tmp.path(), &[("a", 1), ("b", 1), ("c", 1)]);
        assert!(matches!(
            scan_class_dirs(tmp.path()),
            Err(Error::ClassCount { ref found, .. }) if found.len() == 3
        ));
        assert!(matches!(
            scan_class_dirs(&tmp.path().join("nope")),
            Err(Error::MissingDirectory { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_corrupt_image_is_fatal() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write_class_tree(tmp.path(), &[("a", 2), ("b", 2)]);
        std::fs::write(tmp.path().join("b/broken.jpg"), b"not a jpeg")?;
        assert!(matches!(
            load_class_dir(tmp.path(), ImageSize::new(4, 4)),
            Err(Error::Image { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_split_head_takes_leading_fifth() {
        let (train, val) = split_head((0..10).collect::<Vec<_>>());
        assert_eq!(val, vec![0, 1]);
        assert_eq!(train, (2..10).collect::<Vec<_>>());

        let (train, val) = split_head((0..4).collect::<Vec<_>>());
        assert!(val.is_empty());
        assert_eq!(train.len(), 4);

        assert_eq!(validation_count(23), 4);
        assert_eq!(validation_count(25), 5);
    }

    #[test]
    fn test_read_annotations() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("annotations.csv");
        std::fs::write(
            &path,
            "filename,root1_x1,root1_y1,root1_x2,root1_y2,root2_x1,root2_y1,root2_x2,root2_y2,crown_x1,crown_y1,crown_x2,crown_y2,notes\n\
             a.jpg,0,0,3,0,0,0,0,4,0,0,6,8,first\n\
             b.jpg, 1, 1, 1, 2, 1, 1, 2, 1, 0, 0, 0, 50,second\n",
        )?;
        let rows = read_annotations(&path)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filename, "a.jpg");
        assert_eq!(rows[1].crown.y2, 50.0);

        std::fs::write(&path, "filename,root1_x1\na.jpg,1\n")?;
        assert!(matches!(read_annotations(&path), Err(Error::Csv { .. })));

        std::fs::write(
            &path,
            "filename,root1_x1,root1_y1,root1_x2,root1_y2,root2_x1,root2_y1,root2_x2,root2_y2,crown_x1,crown_y1,crown_x2,crown_y2\n\
             a.jpg,0,0,3,zero,0,0,0,4,0,0,6,8\n",
        )?;
        assert!(matches!(read_annotations(&path), Err(Error::Csv { .. })));
        Ok(())
    }
}
