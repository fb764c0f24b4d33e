use crate::dataset::ImageSize;
use crate::runtime::{self, RuntimeConfig};
use crate::tasks::{dispatch, GeneralClassifier, Task, TrainingTask};
use crate::train::{FitSettings, TrainParams, TrainReport};
use anyhow::Context;
use clap::{Args, Parser};
use std::path::PathBuf;

/// Hyperparameters shared by the dispatcher and the single-task binary.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long)]
    /// Base directory of the dataset.
    pub data_dir: PathBuf,

    #[arg(long, num_args = 2, value_names = ["H", "W"], default_values_t = [224, 224])]
    /// Image dimensions (height width).
    pub img_size: Vec<u32>,

    #[arg(long, default_value_t = 32)]
    /// Batch size for training.
    pub batch_size: usize,

    #[arg(long, default_value_t = 20)]
    /// Number of training epochs.
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    /// Adam learning rate.
    pub learning_rate: f64,

    #[arg(long, default_value_t = 1)]
    /// Seed for shuffling and augmentation.
    pub seed: u64,

    #[arg(long, default_value_t = 0)]
    /// Worker threads for data loading, 0 uses all cores.
    pub threads: usize,

    #[clap(long, action = clap::ArgAction::SetTrue)]
    /// Do not use a cuda device even if one is available.
    pub cpu: bool,
}

impl CommonArgs {
    pub fn train_params(&self, output_dir: PathBuf) -> crate::error::Result<TrainParams> {
        Ok(TrainParams {
            data_dir: self.data_dir.clone(),
            output_dir,
            image_size: ImageSize::from_pair(&self.img_size)?,
            batch_size: self.batch_size,
            epochs: self.epochs,
            fit: FitSettings {
                learning_rate: self.learning_rate,
                seed: self.seed,
                ..Default::default()
            },
        })
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            threads: self.threads,
            force_cpu: self.cpu,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "train", version, about = "Train a binary image classifier for one task")]
pub struct DispatchCli {
    /// Task to train.
    #[arg(value_enum)]
    pub task: Task,

    #[arg(long)]
    /// Directory to save the trained model and checkpoint into.
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
#[command(
    name = "train_classifier",
    version,
    about = "Train an image classification model for binary prediction."
)]
pub struct ClassifierCli {
    #[arg(long, default_value = "saved_model")]
    /// Directory to save the trained model.
    pub output: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,
}

fn print_report(report: &TrainReport) {
    if let Some(epoch) = report.stopped_epoch {
        println!("Stopped early after epoch {epoch}");
    }
    println!(
        "Saved model to {}, best checkpoint {}",
        report.artifacts.model_dir.display(),
        report.artifacts.checkpoint.display()
    );
    println!("Validation - {}", report.final_metrics);
}

pub fn run_dispatch(cli: DispatchCli) -> crate::MainResult {
    let params = cli.common.train_params(cli.output_dir)?;
    let runtime = runtime::init(&cli.common.runtime_config())?;
    let report = dispatch(cli.task, &params, &runtime.device)
        .with_context(|| format!("training task {} failed", cli.task))?;
    print_report(&report);
    Ok(())
}

pub fn run_classifier(cli: ClassifierCli) -> crate::MainResult {
    let params = cli.common.train_params(cli.output)?;
    let runtime = runtime::init(&cli.common.runtime_config())?;
    let report = GeneralClassifier
        .train(&params, &runtime.device)
        .context("training failed")?;
    print_report(&report);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dispatch_args() -> anyhow::Result<()> {
        let cli = DispatchCli::try_parse_from([
            "train",
            "age-estimation",
            "--data-dir",
            "data",
            "--output-dir",
            "out",
            "--img-size",
            "128",
            "96",
            "--epochs",
            "3",
        ])?;
        assert_eq!(cli.task, Task::AgeEstimation);
        let params = cli.common.train_params(cli.output_dir)?;
        assert_eq!(params.image_size, ImageSize::new(128, 96));
        assert_eq!(params.epochs, 3);
        assert_eq!(params.batch_size, 32);
        assert_eq!(params.output_dir, PathBuf::from("out"));
        Ok(())
    }

    #[test]
    fn test_dispatch_rejects_unknown_task() {
        let r = DispatchCli::try_parse_from([
            "train",
            "lung-cancer",
            "--data-dir",
            "data",
            "--output-dir",
            "out",
        ]);
        assert!(r.is_err());
        // Output dir is required.
        assert!(DispatchCli::try_parse_from(["train", "breast-cancer", "--data-dir", "d"]).is_err());
    }

    #[test]
    fn test_classifier_defaults() -> anyhow::Result<()> {
        let cli = ClassifierCli::try_parse_from(["train_classifier", "--data-dir", "data"])?;
        assert_eq!(cli.output, PathBuf::from("saved_model"));
        let params = cli.common.train_params(cli.output)?;
        assert_eq!(params.image_size, ImageSize::new(224, 224));
        assert_eq!(params.epochs, 20);
        assert!(!cli.common.cpu);
        Ok(())
    }
}
