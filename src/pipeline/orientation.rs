use anyhow::{Result, anyhow};

use super::inference::{OrientationLogits, common::argmax};
use crate::config::Config;
use crate::types::{Keypoint, OrientationSample, PoseMarker};

/// Class index to degrees for the pitch head (-20..=28, step 3).
pub const A_STEPS: [f32; 17] = [
    -20.0, -17.0, -14.0, -11.0, -8.0, -5.0, -2.0, 1.0, 4.0, 7.0, 10.0, 13.0, 16.0, 19.0, 22.0,
    25.0, 28.0,
];

/// Class index to degrees for the yaw head (-40..=38, step 3).
pub const B_STEPS: [f32; 27] = [
    -40.0, -37.0, -34.0, -31.0, -28.0, -25.0, -22.0, -19.0, -16.0, -13.0, -10.0, -7.0, -4.0, -1.0,
    2.0, 5.0, 8.0, 11.0, 14.0, 17.0, 20.0, 23.0, 26.0, 29.0, 32.0, 35.0, 38.0,
];

/// Class index to degrees for the roll head: -70..=70 in steps of 2.
pub fn c_step(index: usize) -> Option<f32> {
    (index <= 70).then(|| -70.0 + 2.0 * index as f32)
}

/// Class index to scene depth: -9.0..=5.0 in steps of 0.5.
pub fn z_step(index: usize) -> Option<f32> {
    (index <= 28).then(|| -9.0 + 0.5 * index as f32)
}

/// Geometric features fed to the orientation classifier, in model input
/// order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceFeatures {
    pub eyes_dx: f32,
    pub eyes_dy: f32,
    pub left_eye_ear_dx: f32,
    pub left_eye_ear_dy: f32,
    pub right_eye_ear_dx: f32,
    pub right_eye_ear_dy: f32,
    pub eyes_angle: f32,
    pub eyes_distance: f32,
    pub left_ear_to_left_eye: f32,
    pub right_ear_to_right_eye: f32,
}

impl FaceFeatures {
    pub const LEN: usize = 10;

    /// `None` unless both eyes and both ears are known and the eyes are
    /// apart.
    pub fn from_marker(marker: &PoseMarker, width: u32, height: u32) -> Option<Self> {
        let norm = |kp: Keypoint| {
            (
                (kp.x - width as f32 / 2.0) / width as f32,
                (kp.y - height as f32 / 2.0) / height as f32,
            )
        };
        let (lex, ley) = norm(marker.left_eye?);
        let (rex, rey) = norm(marker.right_eye?);
        let (lax, lay) = norm(marker.left_ear?);
        let (rax, ray) = norm(marker.right_ear?);

        let eyes_dx = lex - rex;
        let eyes_dy = ley - rey;
        let left_eye_ear_dx = lex - lax;
        let left_eye_ear_dy = ley - lay;
        let right_eye_ear_dx = rex - rax;
        let right_eye_ear_dy = rey - ray;
        let eyes_distance = eyes_dx.hypot(eyes_dy);
        if eyes_distance <= f32::EPSILON {
            return None;
        }

        Some(Self {
            eyes_dx,
            eyes_dy,
            left_eye_ear_dx,
            left_eye_ear_dy,
            right_eye_ear_dx,
            right_eye_ear_dy,
            eyes_angle: (eyes_dy / eyes_distance).clamp(-1.0, 1.0).asin(),
            eyes_distance,
            left_ear_to_left_eye: left_eye_ear_dx.hypot(left_eye_ear_dy),
            right_ear_to_right_eye: right_eye_ear_dx.hypot(right_eye_ear_dy),
        })
    }

    pub fn to_array(&self) -> [f32; Self::LEN] {
        [
            self.eyes_dx,
            self.eyes_dy,
            self.left_eye_ear_dx,
            self.left_eye_ear_dy,
            self.right_eye_ear_dx,
            self.right_eye_ear_dy,
            self.eyes_angle,
            self.eyes_distance,
            self.left_ear_to_left_eye,
            self.right_ear_to_right_eye,
        ]
    }
}

/// Maps the nose position in the image to overlay translation in the scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub width: u32,
    pub height: u32,
    pub coefficient: f32,
    pub x_offset: f32,
    pub y_offset: f32,
}

impl Projection {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.width,
            height: config.height,
            coefficient: config.projection_coefficient,
            x_offset: config.projection_x_offset,
            y_offset: config.projection_y_offset,
        }
    }

    /// Scene `(x, y)` for an image point; image y grows downwards, scene y
    /// upwards.
    pub fn project(&self, nose: Keypoint) -> (f32, f32) {
        let (w, h) = (self.width as f32, self.height as f32);
        let x = (nose.x - w / 2.0) / w * self.coefficient + self.x_offset;
        let y = -(nose.y - h / 2.0) / h * self.coefficient + self.y_offset;
        (x, y)
    }
}

fn pick(head: &str, scores: &[f32], lookup: impl Fn(usize) -> Option<f32>) -> Result<f32> {
    let index = argmax(scores).ok_or_else(|| anyhow!("classifier head {head} is empty"))?;
    lookup(index).ok_or_else(|| anyhow!("classifier head {head} index {index} out of range"))
}

/// Combine the classifier's rotation and depth with the projected nose.
pub fn decode(
    logits: &OrientationLogits,
    nose: Keypoint,
    projection: &Projection,
) -> Result<OrientationSample> {
    let a = pick("a", &logits.a, |i| A_STEPS.get(i).copied())?;
    let b = pick("b", &logits.b, |i| B_STEPS.get(i).copied())?;
    let c = pick("c", &logits.c, c_step)?;
    let z = pick("z", &logits.z, z_step)?;
    let (x, y) = projection.project(nose);
    Ok(OrientationSample { a, b, c, x, y, z })
}
