//! General purpose classifier: directory layout like breast cancer, with augmentation and a
//! third convolution block.

use super::TrainingTask;
use crate::dataset::{load_directory_split, Split};
use crate::error::Result;
use crate::model::ModelConfig;
use crate::train::{Artifacts, TrainParams};
use std::path::Path;

pub const CHECKPOINT_FILE: &str = "best_model.safetensors";

pub struct GeneralClassifier;

impl TrainingTask for GeneralClassifier {
    fn name(&self) -> &'static str {
        "general"
    }

    fn model_config(&self) -> ModelConfig {
        ModelConfig::general()
    }

    fn load_split(&self, params: &TrainParams) -> Result<Split> {
        load_directory_split(&params.data_dir, params.image_size)
    }

    fn artifacts(&self, output_dir: &Path) -> Artifacts {
        Artifacts {
            model_dir: output_dir.to_owned(),
            checkpoint: output_dir.join(CHECKPOINT_FILE),
        }
    }
}
