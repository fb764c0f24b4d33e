use candle_core::{ModuleT, Result, Tensor};
use candle_nn::VarMap;
use std::collections::HashMap;

/// A sequential struct that holds ModuleT instead of Module such that it can be used for training.
pub struct SequentialT {
    layers: Vec<Box<dyn ModuleT + Send + Sync>>,
}

impl SequentialT {
    pub fn new() -> Self {
        Self { layers: vec![] }
    }

    pub fn add<T: ModuleT + Send + Sync + 'static>(&mut self, v: T) {
        self.layers.push(Box::new(v))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in self.layers.iter() {
            xs = (**layer).forward_t(&xs, train)?
        }
        Ok(xs)
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, false)
    }
}

impl Default for SequentialT {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MaxPoolLayer {
    dim: usize,
}
impl MaxPoolLayer {
    pub fn new(sz: usize) -> Result<MaxPoolLayer> {
        Ok(Self { dim: sz })
    }
}
impl ModuleT for MaxPoolLayer {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        xs.max_pool2d(self.dim)
    }
}

/// (B, C, H, W) -> (B, C), mean over the spatial dimensions.
pub struct GlobalAvgPoolLayer {}
impl ModuleT for GlobalAvgPoolLayer {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        xs.mean((2, 3))
    }
}

/// Multiplies the input by a constant, used to map pixels from [0, 255] to [0, 1].
pub struct RescaleLayer {
    scale: f64,
}
impl RescaleLayer {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }
}
impl ModuleT for RescaleLayer {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Tensor> {
        xs.affine(self.scale, 0.0)
    }
}

/// Mean binary cross entropy computed from logits.
///
/// Uses `max(x, 0) - x * y + ln(1 + exp(-|x|))`, which equals
/// `-(y ln(sigmoid(x)) + (1 - y) ln(1 - sigmoid(x)))` without overflowing for large |x|.
pub fn binary_cross_entropy_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let positive_part = logits.relu()?;
    let log_term = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let loss = positive_part.sub(&logits.mul(targets)?)?.add(&log_term)?;
    loss.mean_all()
}

/// Detached copies of every variable in the varmap, keyed by name.
pub fn snapshot_vars(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("varmap lock poisoned".to_owned()))?;
    let mut snapshot = HashMap::with_capacity(data.len());
    for (name, var) in data.iter() {
        snapshot.insert(name.clone(), var.as_tensor().detach().copy()?);
    }
    Ok(snapshot)
}

/// Writes a snapshot taken by [`snapshot_vars`] back into the varmap.
pub fn restore_vars(varmap: &VarMap, snapshot: &HashMap<String, Tensor>) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("varmap lock poisoned".to_owned()))?;
    for (name, var) in data.iter() {
        match snapshot.get(name) {
            Some(t) => var.set(t)?,
            None => candle_core::bail!("snapshot has no entry for {name}"),
        }
    }
    Ok(())
}

#[cfg(test)]
macro_rules! approx_equal {
    ($a:expr, $b: expr, $max_error:expr) => {
        let delta = ($a - $b).abs();
        if delta > $max_error {
            panic!(
                "a: {a:?}, b: {b:?},  delta was {delta}, this exceeded allowed {max_error}.",
                a = $a,
                b = $b,
                max_error = $max_error
            );
        }
    };
}

// https://stackoverflow.com/a/31749071  export the macro local to this file into the module.
#[cfg(test)]
pub(crate) use approx_equal;
