//! The shared fit / evaluate / persist workflow.

use crate::callbacks::{EarlyStopping, ModelCheckpoint, DEFAULT_PATIENCE};
use crate::candle_util::binary_cross_entropy_with_logits;
use crate::dataset::{ImageSize, Sample, Split};
use crate::error::{Error, Result};
use crate::metrics::{EpochMetrics, MetricsAccumulator};
use crate::model::BinaryClassifier;
use crate::pipeline::{epoch_order, for_each_batch, BatchAugment};
use candle_core::{Device, ModuleT};
use candle_nn::{Optimizer, VarMap};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = "history.json";

/// Hyperparameters shared by every task.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub image_size: ImageSize,
    pub batch_size: usize,
    pub epochs: usize,
    pub fit: FitSettings,
}

impl TrainParams {
    pub fn new(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            image_size: ImageSize::default(),
            batch_size: 32,
            epochs: 20,
            fit: FitSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".into()));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidArgument("epochs must be positive".into()));
        }
        if self.fit.learning_rate.is_nan() || self.fit.learning_rate <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "learning rate must be positive, got {}",
                self.fit.learning_rate
            )));
        }
        Ok(())
    }
}

/// Optimizer and callback settings, defaults follow the stock recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSettings {
    pub learning_rate: f64,
    pub patience: usize,
    pub seed: u64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            patience: DEFAULT_PATIENCE,
            seed: 1,
        }
    }
}

/// Where a run writes its results.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    /// Directory receiving the final weights, config and history.
    pub model_dir: PathBuf,
    /// Best validation accuracy checkpoint.
    pub checkpoint: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: EpochMetrics,
    pub validation: EpochMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub history: Vec<EpochRecord>,
    /// Epoch after which early stopping ended the run.
    pub stopped_epoch: Option<usize>,
    /// Validation metrics of the persisted model.
    pub final_metrics: EpochMetrics,
    pub artifacts: Artifacts,
}

/// Loss, accuracy and AUC of `model` over `samples`.
pub fn evaluate(
    model: &BinaryClassifier,
    samples: &[Sample],
    batch_size: usize,
    device: &Device,
) -> Result<EpochMetrics> {
    let order = (0..samples.len()).collect::<Vec<_>>();
    let mut acc = MetricsAccumulator::new();
    for_each_batch(samples, &order, batch_size, None, device, |batch| {
        let logits = model.forward_t(&batch.images, false)?;
        let loss = binary_cross_entropy_with_logits(&logits, &batch.labels)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;
        acc.push(
            loss.to_scalar::<f32>()?,
            &probs.flatten_all()?.to_vec1::<f32>()?,
            &batch.labels.flatten_all()?.to_vec1::<f32>()?,
        );
        Ok(())
    })?;
    if acc.is_empty() {
        return Err(Error::EmptySplit { split: "evaluation" });
    }
    Ok(acc.finish())
}

pub fn fit(
    model: &BinaryClassifier,
    varmap: &VarMap,
    split: &Split,
    params: &TrainParams,
    artifacts: &Artifacts,
    device: &Device,
) -> Result<TrainReport> {
    params.validate()?;
    split.ensure_non_empty()?;
    let settings = &params.fit;

    let adam_params = candle_nn::ParamsAdamW {
        lr: settings.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut opt = candle_nn::AdamW::new(varmap.all_vars(), adam_params)?;

    let mut checkpoint = ModelCheckpoint::new(&artifacts.checkpoint);
    let mut early_stopping = EarlyStopping::new(settings.patience);
    let mut history = vec![];
    let mut stopped_epoch = None;

    log::info!(
        "Fitting on {} training / {} validation samples, {params:?}",
        split.train.len(),
        split.validation.len()
    );

    for epoch in 0..params.epochs {
        let order = epoch_order(split.train.len(), settings.seed, epoch);
        let augment = model.config().augment.map(|config| BatchAugment {
            config,
            seed: settings.seed.wrapping_mul(31).wrapping_add(epoch as u64),
        });

        let mut train_acc = MetricsAccumulator::new();
        for_each_batch(
            &split.train,
            &order,
            params.batch_size,
            augment,
            device,
            |batch| {
                let logits = model.forward_t(&batch.images, true)?;
                let loss = binary_cross_entropy_with_logits(&logits, &batch.labels)?;
                opt.backward_step(&loss)?;
                let probs = candle_nn::ops::sigmoid(&logits.detach())?;
                train_acc.push(
                    loss.to_scalar::<f32>()?,
                    &probs.flatten_all()?.to_vec1::<f32>()?,
                    &batch.labels.flatten_all()?.to_vec1::<f32>()?,
                );
                Ok(())
            },
        )?;
        let train = train_acc.finish();
        let validation = evaluate(model, &split.validation, params.batch_size, device)?;
        log::info!(
            "{:4} train loss {:8.5} acc {:5.2}% | val loss {:8.5} acc {:5.2}% auc {:.4}",
            epoch + 1,
            train.loss,
            100.0 * train.accuracy,
            validation.loss,
            100.0 * validation.accuracy,
            validation.auc
        );
        if !validation.loss.is_finite() {
            log::warn!("validation loss is not finite in epoch {}", epoch + 1);
        }
        history.push(EpochRecord {
            epoch: epoch + 1,
            train,
            validation,
        });

        checkpoint.on_epoch_end(&validation, varmap)?;
        if early_stopping.on_epoch_end(epoch + 1, &validation, varmap)? {
            log::info!("Epoch {}: early stopping", epoch + 1);
            stopped_epoch = Some(epoch + 1);
            break;
        }
    }

    model.save(varmap, &artifacts.model_dir)?;
    write_history(&artifacts.model_dir, &history)?;
    let final_metrics = evaluate(model, &split.validation, params.batch_size, device)?;

    Ok(TrainReport {
        history,
        stopped_epoch,
        final_metrics,
        artifacts: artifacts.clone(),
    })
}

pub fn write_history(dir: &Path, history: &[EpochRecord]) -> Result<()> {
    let path = dir.join(HISTORY_FILE);
    let file = std::fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
    serde_json::to_writer_pretty(file, history).map_err(|source| Error::Json { path, source })
}
