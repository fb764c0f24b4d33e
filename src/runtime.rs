//! Process wide numeric configuration, set up once before any task runs.

use crate::error::{Error, Result};
use candle_core::Device;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Worker threads for image decoding and augmentation, 0 lets rayon decide.
    pub threads: usize,
    /// Stay on the cpu even if a cuda device is available.
    pub force_cpu: bool,
}

#[derive(Debug)]
pub struct Runtime {
    pub device: Device,
    pub threads: usize,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialises the runtime, a second call fails instead of reconfiguring.
pub fn init(config: &RuntimeConfig) -> Result<&'static Runtime> {
    if RUNTIME.get().is_some() {
        return Err(Error::InvalidArgument(
            "runtime is already initialised".into(),
        ));
    }
    let device = if config.force_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
        .map_err(|e| Error::InvalidArgument(format!("failed to build thread pool: {e}")))?;

    let runtime = RUNTIME.get_or_init(|| Runtime {
        device,
        threads: rayon::current_num_threads(),
    });
    log::info!(
        "Runtime on {:?} with {} worker threads",
        runtime.device,
        runtime.threads
    );
    Ok(runtime)
}
