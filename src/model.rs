//! The binary classification network.
//!
//! input -> rescale to [0, 1] -> (conv 3x3 + relu + maxpool 2) blocks -> global average pool
//! -> dense + relu -> single logit. Augmentation is not a layer here, the batch pipeline applies
//! it to training samples when [`ModelConfig::augment`] is set.

use crate::augment::AugmentConfig;
use crate::candle_util::{GlobalAvgPoolLayer, MaxPoolLayer, RescaleLayer, SequentialT};
use crate::dataset::ImageSize;
use crate::error::{Error, Result};
use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{Activation, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE: &str = "config.json";

const KERNEL_SIZE: usize = 3;
const POOL_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Augmentation used on training batches, `None` disables it.
    pub augment: Option<AugmentConfig>,
    /// Output channels of each convolution block.
    pub conv_channels: Vec<usize>,
    /// Whether the last convolution block is followed by max pooling as well.
    pub pool_after_last: bool,
    pub hidden_units: usize,
}

impl ModelConfig {
    /// General purpose classifier with augmentation and three blocks.
    pub fn general() -> Self {
        Self {
            augment: Some(AugmentConfig::default()),
            conv_channels: vec![32, 64, 128],
            pool_after_last: false,
            hidden_units: 64,
        }
    }

    pub fn breast_cancer() -> Self {
        Self {
            augment: None,
            conv_channels: vec![32, 64],
            pool_after_last: true,
            hidden_units: 64,
        }
    }

    pub fn age_estimation() -> Self {
        Self {
            augment: None,
            conv_channels: vec![32, 64],
            pool_after_last: false,
            hidden_units: 64,
        }
    }

    /// Spatial size after the convolution stack, `None` if it collapses to nothing.
    pub fn feature_size(&self, size: ImageSize) -> Option<(usize, usize)> {
        let mut hw = (size.height as usize, size.width as usize);
        let blocks = self.conv_channels.len();
        for i in 0..blocks {
            hw = (
                hw.0.checked_sub(KERNEL_SIZE - 1)?,
                hw.1.checked_sub(KERNEL_SIZE - 1)?,
            );
            if hw.0 == 0 || hw.1 == 0 {
                return None;
            }
            if i + 1 < blocks || self.pool_after_last {
                hw = (hw.0 / POOL_SIZE, hw.1 / POOL_SIZE);
                if hw.0 == 0 || hw.1 == 0 {
                    return None;
                }
            }
        }
        Some(hw)
    }
}

/// Contents of `config.json` next to the saved weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModelConfig {
    pub model: ModelConfig,
    pub image_size: ImageSize,
}

pub struct BinaryClassifier {
    network: SequentialT,
    config: ModelConfig,
    image_size: ImageSize,
    device: Device,
}

impl BinaryClassifier {
    fn create_network(
        vs: VarBuilder,
        config: &ModelConfig,
        image_size: ImageSize,
    ) -> Result<SequentialT> {
        if config.feature_size(image_size).is_none() {
            return Err(Error::ResolutionTooSmall {
                height: image_size.height as usize,
                width: image_size.width as usize,
            });
        }
        let mut network = SequentialT::new();
        network.add(RescaleLayer::new(1.0 / 255.0));

        let mut in_channels = 3;
        let blocks = config.conv_channels.len();
        for (l, out_channels) in config.conv_channels.iter().enumerate() {
            network.add(candle_nn::conv2d(
                in_channels,
                *out_channels,
                KERNEL_SIZE,
                Default::default(),
                vs.pp(format!("c{l}")),
            )?);
            network.add(Activation::Relu);
            if l + 1 < blocks || config.pool_after_last {
                network.add(MaxPoolLayer::new(POOL_SIZE)?);
            }
            in_channels = *out_channels;
        }
        network.add(GlobalAvgPoolLayer {});
        network.add(candle_nn::linear(
            in_channels,
            config.hidden_units,
            vs.pp("fc0"),
        )?);
        network.add(Activation::Relu);
        network.add(candle_nn::linear(config.hidden_units, 1, vs.pp("fc1"))?);
        Ok(network)
    }

    pub fn new(
        vs: VarBuilder,
        config: &ModelConfig,
        image_size: ImageSize,
        device: &Device,
    ) -> Result<Self> {
        let network = Self::create_network(vs, config, image_size)?;
        Ok(Self {
            network,
            config: config.clone(),
            image_size,
            device: device.clone(),
        })
    }

    /// Rebuilds a model saved with [`BinaryClassifier::save`].
    pub fn load(dir: &Path, device: &Device) -> Result<(Self, VarMap)> {
        Self::load_weights(dir, &dir.join(WEIGHTS_FILE), device)
    }

    /// Rebuilds the architecture from `config_dir/config.json` and loads the weights from
    /// `weights`, for instance a best-accuracy checkpoint written during fitting.
    pub fn load_weights(
        config_dir: &Path,
        weights: &Path,
        device: &Device,
    ) -> Result<(Self, VarMap)> {
        let config_path = config_dir.join(CONFIG_FILE);
        let file = std::fs::File::open(&config_path).map_err(|e| Error::io(&config_path, e))?;
        let saved: SavedModelConfig =
            serde_json::from_reader(file).map_err(|source| Error::Json {
                path: config_path.clone(),
                source,
            })?;

        let mut varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(vs, &saved.model, saved.image_size, device)?;
        varmap.load(weights)?;
        Ok((model, varmap))
    }

    /// Writes the weights and the configuration into `dir`, creating it if needed.
    pub fn save(&self, varmap: &VarMap, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        varmap.save(dir.join(WEIGHTS_FILE))?;
        let config_path = dir.join(CONFIG_FILE);
        let saved = SavedModelConfig {
            model: self.config.clone(),
            image_size: self.image_size,
        };
        let file = std::fs::File::create(&config_path).map_err(|e| Error::io(&config_path, e))?;
        serde_json::to_writer_pretty(file, &saved).map_err(|source| Error::Json {
            path: config_path,
            source,
        })?;
        Ok(())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn layer_count(&self) -> usize {
        self.network.len()
    }

    /// Probabilities of the positive class, shape (B, 1).
    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        Ok(candle_nn::ops::sigmoid(&self.forward_t(x, false)?)?)
    }
}

impl ModuleT for BinaryClassifier {
    /// Logits, shape (B, 1).
    fn forward_t(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let x = x.to_device(&self.device)?;
        self.network.forward_t(&x, train)
    }
}
