//! Training binary image classifiers with candle.
//!
//! Tasks share one workflow: load a labelled image set, build a small convolutional network,
//! fit it with best-accuracy checkpointing and early stopping, and save the result.

pub mod augment;
pub mod callbacks;
pub mod candle_util;
pub mod cli;
pub mod dataset;
pub mod error;
pub mod i3m;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod runtime;
pub mod tasks;
pub mod train;

pub use error::{Error, Result};
pub use tasks::{dispatch, Task, TrainingTask};

pub type MainResult = anyhow::Result<()>;
