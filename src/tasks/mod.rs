//! Training tasks and the dispatcher that routes a task name to one of them.

use crate::dataset::Split;
use crate::error::{Error, Result};
use crate::model::{BinaryClassifier, ModelConfig};
use crate::train::{fit, Artifacts, TrainParams, TrainReport};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use std::path::Path;
use std::str::FromStr;

pub mod age_estimation;
pub mod breast_cancer;
pub mod general;

pub use age_estimation::AgeEstimation;
pub use breast_cancer::BreastCancer;
pub use general::GeneralClassifier;

/// Something that can be trained with the shared fit workflow.
pub trait TrainingTask {
    fn name(&self) -> &'static str;

    fn model_config(&self) -> ModelConfig;

    /// Loads and labels the data, returning the train / validation split.
    fn load_split(&self, params: &TrainParams) -> Result<Split>;

    /// Output locations for a run writing into `output_dir`.
    fn artifacts(&self, output_dir: &Path) -> Artifacts;

    fn train(&self, params: &TrainParams, device: &Device) -> Result<TrainReport> {
        params.validate()?;
        let config = self.model_config();
        if config.feature_size(params.image_size).is_none() {
            return Err(Error::ResolutionTooSmall {
                height: params.image_size.height as usize,
                width: params.image_size.width as usize,
            });
        }
        let split = self.load_split(params)?;
        split.ensure_non_empty()?;

        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = BinaryClassifier::new(vs, &config, params.image_size, device)?;
        log::info!(
            "Built {} model with {} layers for {}x{} input",
            self.name(),
            model.layer_count(),
            params.image_size.height,
            params.image_size.width
        );

        let artifacts = self.artifacts(&params.output_dir);
        fit(&model, &varmap, &split, params, &artifacts, device)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum Task {
    BreastCancer,
    AgeEstimation,
    General,
}

impl Task {
    pub const ALL: [Task; 3] = [Task::BreastCancer, Task::AgeEstimation, Task::General];

    pub fn name(&self) -> &'static str {
        self.runner().name()
    }

    pub fn runner(&self) -> &'static dyn TrainingTask {
        match self {
            Task::BreastCancer => &BreastCancer,
            Task::AgeEstimation => &AgeEstimation,
            Task::General => &GeneralClassifier,
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Task::ALL
            .iter()
            .find(|t| t.name() == s || t.name().replace('-', "_") == s)
            .copied()
            .ok_or_else(|| Error::UnknownTask {
                name: s.to_owned(),
                expected: Task::ALL
                    .iter()
                    .map(|t| t.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Routes to the task's training entry point, holds no state of its own.
pub fn dispatch(task: Task, params: &TrainParams, device: &Device) -> Result<TrainReport> {
    log::info!("Dispatching task {task}");
    task.runner().train(params, device)
}

/// Resolves a task by name first, so an unknown name fails before anything touches the disk.
pub fn dispatch_by_name(name: &str, params: &TrainParams, device: &Device) -> Result<TrainReport> {
    let task = Task::from_str(name)?;
    dispatch(task, params, device)
}
