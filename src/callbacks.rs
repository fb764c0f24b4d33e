//! Per-epoch policies run after validation: best-accuracy checkpointing and early stopping on
//! validation loss.

use crate::candle_util::{restore_vars, snapshot_vars};
use crate::error::{Error, Result};
use crate::metrics::EpochMetrics;
use candle_core::Tensor;
use candle_nn::VarMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATIENCE: usize = 3;

/// Saves the weights whenever validation accuracy strictly improves.
pub struct ModelCheckpoint {
    path: PathBuf,
    best: Option<f64>,
}

impl ModelCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            best: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Returns whether a checkpoint was written.
    pub fn on_epoch_end(&mut self, metrics: &EpochMetrics, varmap: &VarMap) -> Result<bool> {
        if self.best.is_some_and(|b| metrics.accuracy <= b) {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        varmap.save(&self.path)?;
        log::info!(
            "val_accuracy improved from {:?} to {:.4}, saved {}",
            self.best,
            metrics.accuracy,
            self.path.display()
        );
        self.best = Some(metrics.accuracy);
        Ok(true)
    }
}

/// Stops training once validation loss has not improved for `patience` epochs, and puts back
/// the weights of the best epoch when it does.
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    best_epoch: Option<usize>,
    wait: usize,
    best_weights: Option<HashMap<String, Tensor>>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            best_weights: None,
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Returns true when training should stop, the best weights are restored at that point.
    pub fn on_epoch_end(
        &mut self,
        epoch: usize,
        metrics: &EpochMetrics,
        varmap: &VarMap,
    ) -> Result<bool> {
        if metrics.loss < self.best_loss {
            self.best_loss = metrics.loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            self.best_weights = Some(snapshot_vars(varmap)?);
            return Ok(false);
        }
        self.wait += 1;
        if self.wait < self.patience {
            return Ok(false);
        }
        if let Some(weights) = &self.best_weights {
            log::info!(
                "restoring weights from epoch {}",
                self.best_epoch.unwrap_or_default()
            );
            restore_vars(varmap, weights)?;
        }
        Ok(true)
    }
}
