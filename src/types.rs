use std::time::Instant;

use anyhow::{Result, anyhow};

/// Sample layout of a pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
    Rgba8,
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
            PixelLayout::Gray8 => 1,
        }
    }

    pub fn expected_len(self, width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(self.channels())
    }
}

fn check_len(layout: PixelLayout, len: usize, width: u32, height: u32) -> Result<()> {
    let expected = layout.expected_len(width, height);
    if len != expected {
        return Err(anyhow!(
            "{layout:?} buffer size mismatch for {width}x{height}: got {len}, expected {expected}"
        ));
    }
    Ok(())
}

/// An 8-bit RGB frame as captured from the camera or quantised for output.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    #[allow(dead_code)]
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self> {
        check_len(PixelLayout::Rgb8, rgb.len(), width, height)?;
        Ok(Self {
            rgb,
            width,
            height,
            timestamp: Instant::now(),
        })
    }

    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut rgb = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            rgb.extend_from_slice(&color);
        }
        Self {
            rgb,
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

/// An RGB frame with every sample normalised to [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct FloatFrame {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl FloatFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            data: frame.rgb.iter().map(|&v| v as f32 / 255.0).collect(),
            width: frame.width,
            height: frame.height,
        }
    }

    /// Quantise back to 8 bits, rounding to nearest.
    pub fn to_frame(&self) -> Frame {
        Frame {
            rgb: self.data.iter().map(|&v| quantize(v * 255.0)).collect(),
            width: self.width,
            height: self.height,
            timestamp: Instant::now(),
        }
    }
}

pub fn quantize(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Binary foreground mask: 255 for the subject, 0 for background.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Mask {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        check_len(PixelLayout::Gray8, data.len(), width, height)?;
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; width as usize * height as usize],
            width,
            height,
        }
    }

    pub fn foreground_everywhere(width: u32, height: u32) -> Self {
        Self::filled(width, height, 255)
    }
}

/// Straight (non-premultiplied) RGBA image returned by the overlay renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Overlay {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        check_len(PixelLayout::Rgba8, rgba.len(), width, height)?;
        Ok(Self {
            rgba,
            width,
            height,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub score: f32,
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub fn new(score: f32, x: f32, y: f32) -> Self {
        Self { score, x, y }
    }

    pub fn in_bounds(&self, width: u32, height: u32) -> bool {
        self.x >= 0.0 && self.x < width as f32 && self.y >= 0.0 && self.y < height as f32
    }
}

/// The five face landmarks the overlay is oriented from. Any of them may be
/// missing for a given frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PoseMarker {
    pub nose: Option<Keypoint>,
    pub left_eye: Option<Keypoint>,
    pub right_eye: Option<Keypoint>,
    pub left_ear: Option<Keypoint>,
    pub right_ear: Option<Keypoint>,
}

impl PoseMarker {
    /// Combine two markers part by part.
    pub fn zip_with<F>(&self, other: &PoseMarker, mut f: F) -> PoseMarker
    where
        F: FnMut(Option<Keypoint>, Option<Keypoint>) -> Option<Keypoint>,
    {
        PoseMarker {
            nose: f(self.nose, other.nose),
            left_eye: f(self.left_eye, other.left_eye),
            right_eye: f(self.right_eye, other.right_eye),
            left_ear: f(self.left_ear, other.left_ear),
            right_ear: f(self.right_ear, other.right_ear),
        }
    }
}

/// Overlay pose: rotation `a`, `b`, `c` in degrees and translation `x`, `y`,
/// `z` in scene units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OrientationSample {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_round_trip_is_exact_for_8bit_values() {
        let rgb: Vec<u8> = (0..=255).flat_map(|v| [v, 255 - v, v / 2]).collect();
        let frame = Frame::new(256, 1, rgb.clone()).unwrap();
        assert_eq!(FloatFrame::from_frame(&frame).to_frame().rgb, rgb);
    }

    #[test]
    fn test_buffer_size_is_checked() {
        assert!(Frame::new(2, 2, vec![0; 11]).is_err());
        assert!(Mask::new(2, 2, vec![0; 4]).is_ok());
        assert!(Overlay::new(2, 1, vec![0; 6]).is_err());
    }

    #[test]
    fn test_keypoint_bounds_are_half_open() {
        assert!(Keypoint::new(1.0, 0.0, 0.0).in_bounds(4, 2));
        assert!(Keypoint::new(1.0, 3.9, 1.9).in_bounds(4, 2));
        assert!(!Keypoint::new(1.0, 4.0, 1.0).in_bounds(4, 2));
        assert!(!Keypoint::new(1.0, 1.0, -0.1).in_bounds(4, 2));
    }
}
