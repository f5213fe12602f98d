//! Seams to the external models: person segmentation, the face orientation
//! classifier and the overlay renderer.

pub mod common;
pub mod ort;

use anyhow::Result;

use super::orientation::FaceFeatures;
use crate::types::{Frame, Mask, OrientationSample, Overlay, PoseMarker};

#[derive(Clone, Debug)]
pub struct Segmentation {
    pub mask: Mask,
    pub marker: Option<PoseMarker>,
}

pub trait Segmenter {
    fn segment(&mut self, frame: &Frame) -> Result<Segmentation>;

    /// Run once before the first real frame so lazy model setup does not
    /// stall it.
    fn warm_up(&mut self, frame: &Frame) -> Result<()> {
        self.segment(frame).map(|_| ())
    }
}

/// Raw scores of the classifier's four heads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrientationLogits {
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub c: Vec<f32>,
    pub z: Vec<f32>,
}

pub trait OrientationClassifier: Send {
    fn classify(&mut self, features: &FaceFeatures) -> Result<OrientationLogits>;
}

pub trait OverlayRenderer: Send {
    /// Draw the overlay at `sample`. The result may be smaller than the
    /// output frame; the caller scales it up.
    fn render(&mut self, sample: &OrientationSample) -> Result<Overlay>;
}
