use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::Array2;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    OrientationClassifier, OrientationLogits, Segmentation, Segmenter,
    common::{self, decode_keypoints, mask_from_scores},
};
use crate::config::Config;
use crate::pipeline::orientation::FaceFeatures;
use crate::types::Frame;

fn load_session(model_path: &Path, label: &str) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load {label} from {}", model_path.display()))?;
    log::info!("{label} ready using {}", model_path.display());
    Ok(session)
}

/// Person segmentation through ONNX Runtime.
///
/// Output 0 holds per-pixel foreground probabilities at the square input
/// resolution. An optional output 1 holds COCO keypoints as normalised
/// `(y, x, score)` triples, of which the first five describe the face.
pub struct OrtSegmenter {
    session: Session,
    input_size: u32,
    mask_threshold: f32,
    keypoint_min_score: f32,
}

impl OrtSegmenter {
    pub fn new(model_path: &Path, config: &Config) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path, "segmentation model")?,
            input_size: config.segmenter_input_size,
            mask_threshold: config.mask_threshold,
            keypoint_min_score: config.keypoint_min_score,
        })
    }
}

impl Segmenter for OrtSegmenter {
    fn segment(&mut self, frame: &Frame) -> Result<Segmentation> {
        let input = common::prepare_frame(frame, self.input_size)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run segmentation session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("segmentation model returned no outputs"));
        }

        let scores = outputs[0].try_extract_array::<f32>()?;
        let scores: Vec<f32> = scores.iter().copied().collect();
        let mask = mask_from_scores(
            &scores,
            self.input_size,
            self.mask_threshold,
            frame.width,
            frame.height,
        )?;

        let marker = if outputs.len() > 1 {
            let keypoints = outputs[1].try_extract_array::<f32>()?;
            let flat: Vec<f32> = keypoints.iter().copied().collect();
            Some(decode_keypoints(
                &flat,
                frame.width,
                frame.height,
                self.keypoint_min_score,
            )?)
        } else {
            None
        };

        Ok(Segmentation { mask, marker })
    }
}

/// Face orientation classifier: ten features in, four score vectors out.
pub struct OrtOrientationClassifier {
    session: Session,
}

impl OrtOrientationClassifier {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: load_session(model_path, "orientation classifier")?,
        })
    }
}

impl OrientationClassifier for OrtOrientationClassifier {
    fn classify(&mut self, features: &FaceFeatures) -> Result<OrientationLogits> {
        let input = Array2::<f32>::from_shape_vec((1, FaceFeatures::LEN), features.to_array().to_vec())
            .map_err(|err| anyhow!("failed to build feature tensor: {err}"))?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run orientation classifier")?;

        if outputs.len() < 4 {
            return Err(anyhow!(
                "orientation classifier returned {} outputs, expected 4",
                outputs.len()
            ));
        }

        let head = |index: usize| -> Result<Vec<f32>> {
            let scores = outputs[index].try_extract_array::<f32>()?;
            Ok(scores.iter().copied().collect())
        };

        Ok(OrientationLogits {
            a: head(0)?,
            b: head(1)?,
            c: head(2)?,
            z: head(3)?,
        })
    }
}
