use anyhow::{Result, anyhow};
use ndarray::Array4;
use rayon::prelude::*;

use crate::pipeline::resize;
use crate::types::{Frame, Keypoint, Mask, PoseMarker, quantize};

/// Values per keypoint in the segmenter's pose output: `(y, x, score)`.
const KEYPOINT_STRIDE: usize = 3;
/// nose, left eye, right eye, left ear, right ear (COCO order).
const FACE_KEYPOINTS: usize = 5;

/// Stretch the frame to a `size`x`size` NHWC tensor with samples in [0, 1].
pub fn prepare_frame(frame: &Frame, size: u32) -> Result<Array4<f32>> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(3);
    if frame.rgb.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgb.len(),
            expected_len
        ));
    }

    let resized = resize::resize_rgb(frame.rgb.clone(), frame.width, frame.height, size, size)?;
    let normalized: Vec<f32> = resized.par_iter().map(|&v| v as f32 / 255.0).collect();
    Array4::<f32>::from_shape_vec((1, size as usize, size as usize, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

/// Turn a square map of foreground probabilities into a binary mask at frame
/// resolution. Scores are scaled before thresholding so edges follow the
/// interpolated probabilities rather than a blocky upscale.
pub fn mask_from_scores(
    scores: &[f32],
    model_size: u32,
    threshold: f32,
    width: u32,
    height: u32,
) -> Result<Mask> {
    let expected = model_size as usize * model_size as usize;
    if scores.len() != expected {
        return Err(anyhow!(
            "unexpected mask length: got {}, expected {expected}",
            scores.len()
        ));
    }

    let levels: Vec<u8> = scores
        .par_iter()
        .map(|&p| quantize(p.clamp(0.0, 1.0) * 255.0))
        .collect();
    let scaled = resize::resize_gray(levels, model_size, model_size, width, height)?;
    let cutoff = threshold.clamp(0.0, 1.0) * 255.0;
    let data = scaled
        .par_iter()
        .map(|&v| if v as f32 > cutoff { 255 } else { 0 })
        .collect();
    Mask::new(width, height, data)
}

/// Read the five face keypoints from normalised `(y, x, score)` triples.
pub fn decode_keypoints(
    flat: &[f32],
    width: u32,
    height: u32,
    min_score: f32,
) -> Result<PoseMarker> {
    if flat.len() < FACE_KEYPOINTS * KEYPOINT_STRIDE {
        return Err(anyhow!(
            "unexpected keypoints length: got {}, need {}",
            flat.len(),
            FACE_KEYPOINTS * KEYPOINT_STRIDE
        ));
    }

    let point = |index: usize| {
        let base = index * KEYPOINT_STRIDE;
        let (y, x, score) = (flat[base], flat[base + 1], flat[base + 2]);
        (score >= min_score).then(|| Keypoint::new(score, x * width as f32, y * height as f32))
    };

    Ok(PoseMarker {
        nose: point(0),
        left_eye: point(1),
        right_eye: point(2),
        left_ear: point(3),
        right_ear: point(4),
    })
}

pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_frame_shape_and_range() {
        let frame = Frame::filled(8, 4, [255, 0, 51]);
        let input = prepare_frame(&frame, 6).unwrap();
        assert_eq!(input.shape(), &[1, 6, 6, 3]);
        assert_eq!(input[[0, 2, 3, 0]], 1.0);
        assert_eq!(input[[0, 2, 3, 1]], 0.0);
        assert!((input[[0, 5, 5, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_mask_thresholds_scores() {
        let scores = vec![0.9, 0.1, 0.75, 0.2];
        let mask = mask_from_scores(&scores, 2, 0.7, 2, 2).unwrap();
        assert_eq!(mask.data, vec![255, 0, 255, 0]);
    }

    #[test]
    fn test_mask_is_scaled_to_frame() {
        let scores = vec![1.0; 4];
        let mask = mask_from_scores(&scores, 2, 0.5, 6, 4).unwrap();
        assert_eq!((mask.width, mask.height), (6, 4));
        assert!(mask.data.iter().all(|&v| v == 255));

        assert!(mask_from_scores(&scores, 3, 0.5, 6, 4).is_err());
    }

    #[test]
    fn test_decode_keypoints_scales_and_filters() {
        #[rustfmt::skip]
        let flat = vec![
            0.5, 0.25, 0.9,
            0.25, 0.375, 0.8,
            0.4, 0.2, 0.1,
            0.45, 0.35, 0.7,
            0.45, 0.15, 0.6,
            0.9, 0.9, 0.9,
        ];
        let marker = decode_keypoints(&flat, 200, 100, 0.5).unwrap();
        assert_eq!(marker.nose, Some(Keypoint::new(0.9, 50.0, 50.0)));
        assert_eq!(marker.left_eye, Some(Keypoint::new(0.8, 75.0, 25.0)));
        assert!(marker.right_eye.is_none());
        assert!(marker.left_ear.is_some());
        assert!(marker.right_ear.is_some());

        assert!(decode_keypoints(&flat[..10], 200, 100, 0.5).is_err());
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[f32::NAN, -1.0, -2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
