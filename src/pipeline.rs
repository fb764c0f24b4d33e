//! Turns cached samples into batches of tensors.
//!
//! Batches are assembled on a producer thread and handed over through a bounded channel, so the
//! next batch is prepared while the current one runs through the network.

use crate::augment::AugmentConfig;
use crate::dataset::Sample;
use crate::error::{Error, Result};
use candle_core::{Device, Tensor};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;
use std::sync::mpsc::sync_channel;

/// Number of batches that may be waiting ahead of the consumer.
pub const PREFETCH_DEPTH: usize = 2;

pub struct Batch {
    /// (B, 3, H, W) f32 with pixel values in [0, 255].
    pub images: Tensor,
    /// (B, 1) f32 holding 0.0 or 1.0.
    pub labels: Tensor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.images.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Augmentation applied while building a batch, `seed` is mixed with the sample index.
#[derive(Debug, Copy, Clone)]
pub struct BatchAugment {
    pub config: AugmentConfig,
    pub seed: u64,
}

/// Stacks the selected samples into a batch on `device`.
pub fn collect_batch(
    samples: &[Sample],
    indices: &[usize],
    augment: Option<BatchAugment>,
    device: &Device,
) -> Result<Batch> {
    let first = indices
        .first()
        .and_then(|i| samples.get(*i))
        .ok_or(Error::EmptySplit { split: "batch" })?;
    let (w, h) = first.image.dimensions();

    let images = indices
        .par_iter()
        .map(|i| {
            let sample = &samples[*i];
            let pixels = match augment {
                Some(a) => {
                    let mut rng = XorShiftRng::seed_from_u64(a.seed ^ (*i as u64 + 1));
                    a.config.apply(&sample.image, &mut rng).into_raw()
                }
                None => sample.image.as_raw().clone(),
            };
            pixels.into_iter().map(f32::from).collect::<Vec<f32>>()
        })
        .collect::<Vec<_>>();
    let pixels = images.concat();

    let images = Tensor::from_vec(pixels, (indices.len(), h as usize, w as usize, 3), &Device::Cpu)?
        .permute((0, 3, 1, 2))?
        .contiguous()?
        .to_device(device)?;

    let labels = indices
        .iter()
        .map(|i| samples[*i].label as f32)
        .collect::<Vec<_>>();
    let labels = Tensor::from_vec(labels, (indices.len(), 1), device)?;

    Ok(Batch { images, labels })
}

/// Shuffled sample order for one epoch, deterministic for a given seed and epoch.
pub fn epoch_order(len: usize, seed: u64, epoch: usize) -> Vec<usize> {
    let mut rng = XorShiftRng::seed_from_u64(seed.wrapping_add(epoch as u64));
    let mut shuffled_indices: Vec<usize> = (0..len).collect();
    shuffled_indices.shuffle(&mut rng);
    shuffled_indices
}

/// Runs `consume` on every batch of `order`, in order, while the following batch is built on
/// a separate thread. Stops at the first error from either side.
pub fn for_each_batch<F>(
    samples: &[Sample],
    order: &[usize],
    batch_size: usize,
    augment: Option<BatchAugment>,
    device: &Device,
    mut consume: F,
) -> Result<()>
where
    F: FnMut(Batch) -> Result<()>,
{
    if batch_size == 0 {
        return Err(Error::InvalidArgument("batch size must be positive".into()));
    }
    std::thread::scope(|s| {
        let (tx, rx) = sync_channel::<Result<Batch>>(PREFETCH_DEPTH);
        s.spawn(move || {
            for chunk in order.chunks(batch_size) {
                let batch = collect_batch(samples, chunk, augment, device);
                let failed = batch.is_err();
                // The receiver is gone when the consumer bailed out.
                if tx.send(batch).is_err() || failed {
                    break;
                }
            }
        });
        for batch in rx {
            consume(batch?)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use image::{Rgb, RgbImage};

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                image: RgbImage::from_fn(3, 2, |x, y| Rgb([i as u8, x as u8, y as u8])),
                label: (i % 2) as u8,
            })
            .collect()
    }

    #[test]
    fn test_collect_batch_layout() -> anyhow::Result<()> {
        let samples = samples(4);
        let batch = collect_batch(&samples, &[3, 0], None, &Device::Cpu)?;
        assert_eq!(batch.images.dims4()?, (2, 3, 2, 3));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.labels.to_vec2::<f32>()?, &[[1.0], [0.0]]);

        // Channel 0 holds the sample index, channel 1 the x coordinate, channel 2 the y.
        let first = batch.images.get(0)?;
        assert_eq!(first.get(0)?.to_vec2::<f32>()?, &[[3.0; 3], [3.0; 3]]);
        assert_eq!(first.get(1)?.to_vec2::<f32>()?, &[[0.0, 1.0, 2.0], [0.0, 1.0, 2.0]]);
        assert_eq!(first.get(2)?.to_vec2::<f32>()?, &[[0.0; 3], [1.0; 3]]);
        Ok(())
    }

    #[test]
    fn test_epoch_order_is_permutation() {
        let a = epoch_order(10, 1, 0);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        assert_eq!(a, epoch_order(10, 1, 0));
        assert_ne!(a, epoch_order(10, 1, 1));
    }

    #[test]
    fn test_for_each_batch_visits_in_order() -> anyhow::Result<()> {
        let samples = samples(7);
        let order = (0..7).collect::<Vec<_>>();
        let mut sizes = vec![];
        let mut firsts = vec![];
        for_each_batch(&samples, &order, 3, None, &Device::Cpu, |batch| {
            sizes.push(batch.len());
            firsts.push(batch.images.get(0)?.get(0)?.get(0)?.get(0)?.to_scalar::<f32>()?);
            Ok(())
        })?;
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(firsts, vec![0.0, 3.0, 6.0]);
        Ok(())
    }

    #[test]
    fn test_for_each_batch_stops_on_consumer_error() {
        let samples = samples(20);
        let order = (0..20).collect::<Vec<_>>();
        let mut seen = 0;
        let r = for_each_batch(&samples, &order, 2, None, &Device::Cpu, |_batch| {
            seen += 1;
            if seen == 2 {
                return Err(Error::InvalidArgument("stop".into()));
            }
            Ok(())
        });
        assert!(r.is_err());
        assert_eq!(seen, 2);
        assert!(for_each_batch(&samples, &order, 0, None, &Device::Cpu, |_| Ok(())).is_err());
    }
}
