//! Random training-time augmentation: horizontal flip, rotation and zoom.
//!
//! Rotation and zoom are combined into one projective warp about the image centre, pixels that
//! fall outside the source are filled with black instead of mirroring the image content.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Probability of mirroring the image left to right.
    pub flip_horizontal_prob: f32,
    /// Maximum rotation as a fraction of a full turn, sampled from `[-f, f]`.
    pub rotation_factor: f32,
    /// Maximum relative zoom, the scale is sampled from `[1 - f, 1 + f]`.
    pub zoom_factor: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            flip_horizontal_prob: 0.5,
            rotation_factor: 0.1,
            zoom_factor: 0.2,
        }
    }
}

impl AugmentConfig {
    pub fn apply<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let flip = self.flip_horizontal_prob > 0.0 && rng.gen::<f32>() < self.flip_horizontal_prob;
        let mut out = if flip {
            image::imageops::flip_horizontal(img)
        } else {
            img.clone()
        };

        let theta = if self.rotation_factor > 0.0 {
            let max = self.rotation_factor * 2.0 * std::f32::consts::PI;
            rng.gen_range(-max..=max)
        } else {
            0.0
        };
        let scale = if self.zoom_factor > 0.0 {
            rng.gen_range((1.0 - self.zoom_factor)..=(1.0 + self.zoom_factor))
        } else {
            1.0
        };

        if theta != 0.0 || scale != 1.0 {
            out = rotate_and_zoom(&out, theta, scale);
        }
        out
    }
}

/// Rotates by `theta` radians and scales by `scale` about the image centre.
pub fn rotate_and_zoom(img: &RgbImage, theta: f32, scale: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let projection = Projection::translate(cx, cy)
        * Projection::rotate(theta)
        * Projection::scale(scale, scale)
        * Projection::translate(-cx, -cy);
    warp(img, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]))
}
