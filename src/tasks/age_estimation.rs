//! Minor vs adult from dental radiographs.
//!
//! `annotations.csv` carries root and crown segments per image, the label is derived from the
//! I3M index. The first fifth of the table, in file order, is held out for validation.

use super::TrainingTask;
use crate::dataset::{load_samples, read_annotations, split_head, Split};
use crate::error::{Error, Result};
use crate::i3m::{age_label, compute_i3m};
use crate::model::ModelConfig;
use crate::train::{Artifacts, TrainParams};
use std::path::{Path, PathBuf};

pub const ANNOTATIONS_FILE: &str = "annotations.csv";
pub const IMAGES_DIR: &str = "images";
pub const CHECKPOINT_FILE: &str = "best_age.safetensors";
pub const MODEL_DIR: &str = "age_model";

pub struct AgeEstimation;

impl AgeEstimation {
    /// Image paths paired with derived labels, in annotation order.
    pub fn labelled_paths(data_dir: &Path) -> Result<Vec<(PathBuf, u8)>> {
        if !data_dir.is_dir() {
            return Err(Error::MissingDirectory {
                path: data_dir.to_owned(),
            });
        }
        let annotations = read_annotations(&data_dir.join(ANNOTATIONS_FILE))?;
        let i3m = compute_i3m(&annotations)?;
        let images = data_dir.join(IMAGES_DIR);
        let entries = annotations
            .iter()
            .zip(i3m)
            .map(|(a, index)| (images.join(&a.filename), age_label(index)))
            .collect::<Vec<_>>();
        log::info!(
            "{} annotated images, {} labelled adult",
            entries.len(),
            entries.iter().filter(|(_, l)| *l == 1).count()
        );
        Ok(entries)
    }
}

impl TrainingTask for AgeEstimation {
    fn name(&self) -> &'static str {
        "age-estimation"
    }

    fn model_config(&self) -> ModelConfig {
        ModelConfig::age_estimation()
    }

    fn load_split(&self, params: &TrainParams) -> Result<Split> {
        let entries = Self::labelled_paths(&params.data_dir)?;
        let (train, validation) = split_head(entries);
        Ok(Split {
            train: load_samples(&train, params.image_size)?,
            validation: load_samples(&validation, params.image_size)?,
        })
    }

    fn artifacts(&self, output_dir: &Path) -> Artifacts {
        Artifacts {
            model_dir: output_dir.join(MODEL_DIR),
            checkpoint: output_dir.join(CHECKPOINT_FILE),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dataset::test::write_image;
    use crate::dataset::ImageSize;
    use crate::model::{BinaryClassifier, ModelConfig, WEIGHTS_FILE};
    use candle_core::{Device, Tensor};

    const HEADER: &str = "filename,root1_x1,root1_y1,root1_x2,root1_y2,root2_x1,root2_y1,root2_x2,root2_y2,crown_x1,crown_y1,crown_x2,crown_y2\n";

    /// Ten rows, even rows are adult (index 0.02), odd rows minor (index 0.7).
    fn write_dataset(dir: &Path) {
        std::fs::create_dir_all(dir.join(IMAGES_DIR)).unwrap();
        let mut csv = HEADER.to_owned();
        for i in 0..10 {
            let name = format!("pano_{i:02}.jpg");
            if i % 2 == 0 {
                csv.push_str(&format!("{name},0,0,1,0,0,0,0,1,0,0,0,100\n"));
                write_image(&dir.join(IMAGES_DIR).join(&name), [230, 230, 230]);
            } else {
                csv.push_str(&format!("{name},0,0,3,0,0,0,0,4,0,0,6,8\n"));
                write_image(&dir.join(IMAGES_DIR).join(&name), [10, 10, 10]);
            }
        }
        std::fs::write(dir.join(ANNOTATIONS_FILE), csv).unwrap();
    }

    #[test]
    fn test_labels_and_split() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write_dataset(tmp.path());

        let entries = AgeEstimation::labelled_paths(tmp.path())?;
        assert_eq!(
            entries.iter().map(|(_, l)| *l).collect::<Vec<_>>(),
            vec![1, 0, 1, 0, 1, 0, 1, 0, 1, 0]
        );
        assert!(entries[3].0.ends_with("images/pano_03.jpg"));

        let mut params = TrainParams::new(tmp.path(), tmp.path().join("out"));
        params.image_size = ImageSize::new(16, 16);
        let split = AgeEstimation.load_split(&params)?;
        assert_eq!(split.validation.len(), 2);
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.validation[0].label, 1);
        assert_eq!(split.validation[1].label, 0);
        Ok(())
    }

    #[test]
    fn test_zero_crown_aborts() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write_dataset(tmp.path());
        let mut csv = std::fs::read_to_string(tmp.path().join(ANNOTATIONS_FILE))?;
        csv.push_str("pano_00.jpg,0,0,1,0,0,0,0,1,5,5,5,5\n");
        std::fs::write(tmp.path().join(ANNOTATIONS_FILE), csv)?;
        assert!(matches!(
            AgeEstimation::labelled_paths(tmp.path()),
            Err(Error::DegenerateCrown { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_missing_image_is_fatal() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write_dataset(tmp.path());
        std::fs::remove_file(tmp.path().join(IMAGES_DIR).join("pano_07.jpg"))?;
        let params = TrainParams::new(tmp.path(), tmp.path().join("out"));
        assert!(matches!(
            AgeEstimation.load_split(&params),
            Err(Error::Image { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_train_toy_dataset() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        write_dataset(tmp.path());
        let out = tmp.path().join("out");
        let mut params = TrainParams::new(tmp.path(), &out);
        params.image_size = ImageSize::new(16, 16);
        params.batch_size = 4;
        params.epochs = 1;

        let report = AgeEstimation.train(&params, &Device::Cpu)?;
        assert!(out.join(CHECKPOINT_FILE).is_file());
        assert!(out.join(MODEL_DIR).join(WEIGHTS_FILE).is_file());
        assert!(report.final_metrics.loss.is_finite());
        assert!((0.0..=1.0).contains(&report.final_metrics.auc));

        // The checkpoint lives beside the model directory and loads with its config. After a
        // single epoch it holds the same weights as the final model.
        let model_dir = out.join(MODEL_DIR);
        let (best, _) =
            BinaryClassifier::load_weights(&model_dir, &out.join(CHECKPOINT_FILE), &Device::Cpu)?;
        let (last, _) = BinaryClassifier::load(&model_dir, &Device::Cpu)?;
        assert_eq!(best.config(), &ModelConfig::age_estimation());
        let input = Tensor::arange(0f32, (2 * 3 * 16 * 16) as f32, &Device::Cpu)?
            .reshape((2, 3, 16, 16))?
            .affine(0.1, 0.0)?;
        assert_eq!(
            best.predict(&input)?.to_vec2::<f32>()?,
            last.predict(&input)?.to_vec2::<f32>()?
        );
        Ok(())
    }
}
