use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::PipelineError;

pub const DEFAULT_CONFIG_PATH: &str = "holo-cam.toml";

/// Immutable settings handed to every component at construction.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Index of the physical camera to read from.
    pub camera_index: u32,
    /// Virtual camera device node (a v4l2loopback output).
    pub device_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Weight of the newest sample in the exponential moving average.
    pub moving_avg_ratio: f32,
    /// Side of the square structuring element used to grow the mask.
    pub dilation: u32,
    /// Gaussian kernel size used to soften the grown mask. Must be odd.
    pub blur: u32,
    pub background_path: PathBuf,
    pub segmenter_model_path: PathBuf,
    pub segmenter_model_url: Option<String>,
    pub segmenter_input_size: u32,
    /// Model scores above this value count as foreground.
    pub mask_threshold: f32,
    /// Keypoints scored below this are treated as not detected.
    pub keypoint_min_score: f32,
    pub orientation_model_path: PathBuf,
    pub orientation_model_url: Option<String>,
    pub overlay_path: PathBuf,
    /// Resolution of the rendered overlay relative to the output frame.
    pub render_scale: f32,
    /// Scale from normalised image offsets to scene units.
    pub projection_coefficient: f32,
    pub projection_x_offset: f32,
    pub projection_y_offset: f32,
    pub profiling_max_samples: usize,
    /// Frames between two profiling reports; 0 disables them.
    pub report_interval: u64,
    pub device_retry_limit: u32,
    pub device_retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_index: 0,
            device_path: PathBuf::from("/dev/video20"),
            width: 1280,
            height: 720,
            moving_avg_ratio: 0.1,
            dilation: 15,
            blur: 21,
            background_path: PathBuf::from("resources/background.jpg"),
            segmenter_model_path: PathBuf::from("models/person_segmentation.onnx"),
            segmenter_model_url: None,
            segmenter_input_size: 256,
            mask_threshold: 0.7,
            keypoint_min_score: 0.0,
            orientation_model_path: PathBuf::from("models/face_orientation.onnx"),
            orientation_model_url: None,
            overlay_path: PathBuf::from("resources/overlay.png"),
            render_scale: 0.5,
            projection_coefficient: 10.0,
            projection_x_offset: 0.0,
            projection_y_offset: 0.0,
            profiling_max_samples: 100,
            report_interval: 120,
            device_retry_limit: 3,
            device_retry_backoff_ms: 200,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::configuration(format!(
                "frame size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 {
            return Err(PipelineError::configuration(format!(
                "frame width must be even for 4:2:2 output, got {}",
                self.width
            )));
        }
        let image_size = self
            .width
            .checked_mul(2)
            .and_then(|line| line.checked_mul(self.height));
        if image_size.is_none() {
            return Err(PipelineError::configuration(format!(
                "frame size {}x{} does not fit a 32-bit image size",
                self.width, self.height
            )));
        }
        if !(self.moving_avg_ratio > 0.0 && self.moving_avg_ratio <= 1.0) {
            return Err(PipelineError::configuration(format!(
                "moving_avg_ratio must lie in (0, 1], got {}",
                self.moving_avg_ratio
            )));
        }
        if self.dilation == 0 {
            return Err(PipelineError::configuration("dilation must be at least 1"));
        }
        if self.blur % 2 == 0 {
            return Err(PipelineError::configuration(format!(
                "blur kernel size must be odd, got {}",
                self.blur
            )));
        }
        if !(self.render_scale > 0.0 && self.render_scale <= 1.0) {
            return Err(PipelineError::configuration(format!(
                "render_scale must lie in (0, 1], got {}",
                self.render_scale
            )));
        }
        if self.segmenter_input_size == 0 {
            return Err(PipelineError::configuration(
                "segmenter_input_size must be non-zero",
            ));
        }
        Ok(())
    }

    /// Size the overlay renderer is asked to draw at.
    pub fn render_size(&self) -> (u32, u32) {
        let w = ((self.width as f32 * self.render_scale).round() as u32).max(1);
        let h = ((self.height as f32 * self.render_scale).round() as u32).max(1);
        (w, h)
    }
}
