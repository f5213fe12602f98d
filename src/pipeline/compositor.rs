use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;

use super::resize;
use crate::types::{FloatFrame, Frame, Mask, Overlay};

/// Structuring element and blur kernel applied to every raw mask. Built once
/// and only read afterwards.
#[derive(Clone, Debug)]
pub struct MaskKernel {
    dilation: usize,
    blur_weights: Vec<f32>,
}

impl MaskKernel {
    pub fn new(dilation: u32, blur: u32) -> Self {
        Self {
            dilation: dilation.max(1) as usize,
            blur_weights: gaussian_weights(blur.max(1) as usize),
        }
    }

    /// Grow, soften and normalise a binary mask into per-pixel blend weights
    /// in [0, 1].
    pub fn weights(&self, mask: &Mask) -> Vec<f32> {
        let (w, h) = (mask.width as usize, mask.height as usize);
        let grown = dilate(&mask.data, w, h, self.dilation);
        let normalized: Vec<f32> = grown.par_iter().map(|&v| v as f32 / 255.0).collect();
        let mut blurred = blur(&normalized, w, h, &self.blur_weights);
        blurred.par_iter_mut().for_each(|v| *v = v.clamp(0.0, 1.0));
        blurred
    }
}

/// Normalised 1D Gaussian of odd size `ksize`, with sigma derived from the
/// size the same way OpenCV does when sigma is left at zero.
fn gaussian_weights(ksize: usize) -> Vec<f32> {
    if ksize <= 1 {
        return vec![1.0];
    }
    let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (ksize / 2) as f64;
    let raw: Vec<f64> = (0..ksize)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|v| (v / sum) as f32).collect()
}

/// Square max filter of side `size`, done as a row pass then a column pass.
/// Pixels outside the image are ignored.
fn dilate(data: &[u8], width: usize, height: usize, size: usize) -> Vec<u8> {
    if size <= 1 || width == 0 || height == 0 {
        return data.to_vec();
    }
    let before = size / 2;
    let after = size - 1 - before;

    let mut rows = vec![0u8; data.len()];
    rows.par_chunks_mut(width)
        .zip(data.par_chunks(width))
        .for_each(|(dst, src)| {
            for x in 0..width {
                let lo = x.saturating_sub(before);
                let hi = (x + after).min(width - 1);
                dst[x] = src[lo..=hi].iter().copied().max().unwrap_or(0);
            }
        });

    let mut out = vec![0u8; data.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, dst)| {
        let lo = y.saturating_sub(before);
        let hi = (y + after).min(height - 1);
        for x in 0..width {
            dst[x] = (lo..=hi).map(|yy| rows[yy * width + x]).max().unwrap_or(0);
        }
    });
    out
}

/// Separable convolution with edge pixels replicated past the border.
fn blur(data: &[f32], width: usize, height: usize, weights: &[f32]) -> Vec<f32> {
    if weights.len() <= 1 || width == 0 || height == 0 {
        return data.to_vec();
    }
    let radius = (weights.len() / 2) as isize;
    let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;

    let mut rows = vec![0f32; data.len()];
    rows.par_chunks_mut(width)
        .zip(data.par_chunks(width))
        .for_each(|(dst, src)| {
            for x in 0..width {
                dst[x] = weights
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * src[clamp(x as isize + k as isize - radius, width)])
                    .sum();
            }
        });

    let mut out = vec![0f32; data.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, dst)| {
        for x in 0..width {
            dst[x] = weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let yy = clamp(y as isize + k as isize - radius, height);
                    w * rows[yy * width + x]
                })
                .sum();
        }
    });
    out
}

/// Layer 1: keep the subject from `frame` and take everything else from
/// `background`, weighting by the softened mask.
pub fn compose_background(
    frame: &Frame,
    mask: &Mask,
    background: &FloatFrame,
    kernel: &MaskKernel,
) -> Result<FloatFrame> {
    let (w, h) = (frame.width, frame.height);
    if (mask.width, mask.height) != (w, h) || (background.width, background.height) != (w, h) {
        return Err(anyhow!(
            "layer size mismatch: frame {}x{}, mask {}x{}, background {}x{}",
            w,
            h,
            mask.width,
            mask.height,
            background.width,
            background.height
        ));
    }

    let weights = kernel.weights(mask);
    let mut data = vec![0f32; frame.rgb.len()];
    data.par_chunks_exact_mut(3)
        .zip(frame.rgb.par_chunks_exact(3))
        .zip(background.data.par_chunks_exact(3))
        .zip(weights.par_iter())
        .for_each(|(((dst, fg), bg), &m)| {
            for c in 0..3 {
                dst[c] = m * (fg[c] as f32 / 255.0) + (1.0 - m) * bg[c];
            }
        });

    Ok(FloatFrame {
        data,
        width: w,
        height: h,
    })
}

/// Layer 2: the "over" operator using the overlay's own alpha. Without an
/// overlay the blended frame passes through unchanged.
pub fn compose_overlay(blended: FloatFrame, overlay: Option<&Overlay>) -> Result<FloatFrame> {
    let Some(overlay) = overlay else {
        return Ok(blended);
    };
    if (overlay.width, overlay.height) != (blended.width, blended.height) {
        return Err(anyhow!(
            "overlay is {}x{} but frame is {}x{}",
            overlay.width,
            overlay.height,
            blended.width,
            blended.height
        ));
    }

    let mut out = blended;
    out.data
        .par_chunks_exact_mut(3)
        .zip(overlay.rgba.par_chunks_exact(4))
        .for_each(|(dst, px)| {
            let alpha = px[3] as f32 / 255.0;
            for c in 0..3 {
                dst[c] = (px[c] as f32 / 255.0) * alpha + dst[c] * (1.0 - alpha);
            }
        });
    Ok(out)
}

/// Holds the static layers shared by every frame.
#[derive(Debug)]
pub struct BackgroundCompositor {
    background: FloatFrame,
    kernel: MaskKernel,
}

impl BackgroundCompositor {
    pub fn new(background: FloatFrame, kernel: MaskKernel) -> Self {
        Self { background, kernel }
    }

    pub fn compose(&self, frame: &Frame, mask: &Mask) -> Result<FloatFrame> {
        compose_background(frame, mask, &self.background, &self.kernel)
    }

    pub fn background(&self) -> &FloatFrame {
        &self.background
    }
}

/// Load the replacement background, scaled to the output size.
pub fn load_background(path: &Path, width: u32, height: u32) -> Result<FloatFrame> {
    let image = image::open(path)
        .with_context(|| format!("failed to load background {}", path.display()))?
        .to_rgb8();
    let (src_w, src_h) = image.dimensions();
    let rgb = resize::resize_rgb(image.into_raw(), src_w, src_h, width, height)
        .context("failed to scale background")?;
    let frame = Frame::new(width, height, rgb)?;
    Ok(FloatFrame::from_frame(&frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let rgb = (0..width * height)
            .flat_map(|i| {
                let v = (i * 37 % 256) as u8;
                [v, 255 - v, v / 3]
            })
            .collect();
        Frame::new(width, height, rgb).unwrap()
    }

    fn background(width: u32, height: u32) -> (Frame, FloatFrame) {
        let frame = Frame::filled(width, height, [12, 200, 77]);
        let float = FloatFrame::from_frame(&frame);
        (frame, float)
    }

    #[test]
    fn test_empty_mask_yields_background_exactly() {
        let frame = gradient_frame(8, 6);
        let (bg_frame, bg) = background(8, 6);
        let mask = Mask::filled(8, 6, 0);
        let out = compose_background(&frame, &mask, &bg, &MaskKernel::new(5, 7)).unwrap();
        assert_eq!(out, bg);
        assert_eq!(out.to_frame().rgb, bg_frame.rgb);
    }

    #[test]
    fn test_full_mask_yields_frame() {
        let frame = gradient_frame(8, 6);
        let (_, bg) = background(8, 6);
        let mask = Mask::foreground_everywhere(8, 6);
        let out = compose_background(&frame, &mask, &bg, &MaskKernel::new(5, 7)).unwrap();
        for (got, want) in out.to_frame().rgb.iter().zip(frame.rgb.iter()) {
            assert!((*got as i16 - *want as i16).abs() <= 1);
        }
    }

    #[test]
    fn test_dilation_grows_subject() {
        let mut data = vec![0u8; 7 * 7];
        data[3 * 7 + 3] = 255;
        let grown = dilate(&data, 7, 7, 3);
        for y in 0..7 {
            for x in 0..7 {
                let inside = (2..=4).contains(&x) && (2..=4).contains(&y);
                assert_eq!(grown[y * 7 + x], if inside { 255 } else { 0 }, "({x},{y})");
            }
        }
    }

    #[test]
    fn test_dilation_at_border_stays_in_image() {
        let mut data = vec![0u8; 4 * 1];
        data[0] = 255;
        assert_eq!(dilate(&data, 4, 1, 3), vec![255, 255, 0, 0]);
    }

    #[test]
    fn test_gaussian_weights_are_normalized_and_symmetric() {
        let weights = gaussian_weights(9);
        assert_eq!(weights.len(), 9);
        let sum: f32 = weights.iter().sum();
        assert!(approx_eq(sum, 1.0, 1e-5));
        for i in 0..4 {
            assert!(approx_eq(weights[i], weights[8 - i], 1e-7));
            assert!(weights[i] < weights[i + 1]);
        }
    }

    #[test]
    fn test_blur_softens_edges_into_unit_range() {
        let mut data = vec![0u8; 10];
        for v in data.iter_mut().skip(5) {
            *v = 255;
        }
        let mask = Mask::new(10, 1, data).unwrap();
        let weights = MaskKernel::new(1, 5).weights(&mask);
        assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
        assert!(approx_eq(weights[0], 0.0, 1e-6));
        assert!(approx_eq(weights[9], 1.0, 1e-5));
        assert!(weights[4] > 0.0 && weights[4] < 0.5);
        assert!(weights[5] > 0.5 && weights[5] < 1.0);
    }

    #[test]
    fn test_blend_is_linear_in_mask_weight() {
        let frame = Frame::filled(2, 1, [255, 0, 100]);
        let bg = FloatFrame::from_frame(&Frame::filled(2, 1, [0, 255, 200]));
        let mask = Mask::new(2, 1, vec![255, 0]).unwrap();
        let out = compose_background(&frame, &mask, &bg, &MaskKernel::new(1, 1))
            .unwrap()
            .to_frame();
        assert_eq!(out.rgb, vec![255, 0, 100, 0, 255, 200]);
    }

    #[test]
    fn test_overlay_over_operator() {
        let blended = FloatFrame::from_frame(&Frame::filled(2, 1, [0, 0, 0]));
        let overlay = Overlay::new(2, 1, vec![255, 255, 255, 255, 200, 100, 50, 0]).unwrap();
        let out = compose_overlay(blended.clone(), Some(&overlay))
            .unwrap()
            .to_frame();
        assert_eq!(out.rgb, vec![255, 255, 255, 0, 0, 0]);

        let half = Overlay::new(2, 1, vec![200, 100, 0, 128, 200, 100, 0, 128]).unwrap();
        let base = FloatFrame::from_frame(&Frame::filled(2, 1, [100, 100, 100]));
        let out = compose_overlay(base, Some(&half)).unwrap();
        let a = 128.0 / 255.0;
        let expected_r = (200.0 / 255.0) * a + (100.0 / 255.0) * (1.0 - a);
        assert!(approx_eq(out.data[0], expected_r, 1e-6));
    }

    #[test]
    fn test_missing_overlay_is_passthrough() {
        let blended = FloatFrame::from_frame(&gradient_frame(4, 2));
        let out = compose_overlay(blended.clone(), None).unwrap();
        assert_eq!(out, blended);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let frame = gradient_frame(4, 2);
        let (_, bg) = background(4, 2);
        let mask = Mask::filled(2, 2, 0);
        assert!(compose_background(&frame, &mask, &bg, &MaskKernel::new(1, 1)).is_err());

        let overlay = Overlay::new(1, 1, vec![0; 4]).unwrap();
        assert!(compose_overlay(bg, Some(&overlay)).is_err());
    }
}
