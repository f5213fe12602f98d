use std::path::Path;

use anyhow::{Context, Result};
use image::RgbaImage;
use rayon::prelude::*;

use super::inference::OverlayRenderer;
use super::orientation::Projection;
use crate::types::{OrientationSample, Overlay};

/// Distance from the virtual camera to the scene origin, in scene units.
const CAMERA_DISTANCE: f32 = 10.0;
/// Sprite height at depth 0, as a fraction of the canvas height.
const SPRITE_HEIGHT_FRACTION: f32 = 0.5;

/// Draws a flat RGBA sprite as a billboard: rolled by `c`, foreshortened by
/// `a` and `b`, scaled by depth `z` and centred on the projected `(x, y)`.
/// Stands in for a full 3D renderer when none is attached.
pub struct SpriteRenderer {
    sprite: RgbaImage,
    width: u32,
    height: u32,
    projection: Projection,
}

impl SpriteRenderer {
    pub fn load(path: &Path, width: u32, height: u32, projection: Projection) -> Result<Self> {
        let sprite = image::open(path)
            .with_context(|| format!("failed to load overlay sprite {}", path.display()))?
            .to_rgba8();
        log::info!(
            "overlay sprite {} loaded ({}x{})",
            path.display(),
            sprite.width(),
            sprite.height()
        );
        Ok(Self::new(sprite, width, height, projection))
    }

    pub fn new(sprite: RgbaImage, width: u32, height: u32, projection: Projection) -> Self {
        Self {
            sprite,
            width,
            height,
            projection,
        }
    }

    /// Canvas pixel for a scene point, inverting the nose projection.
    fn canvas_point(&self, x: f32, y: f32) -> (f32, f32) {
        let (w, h) = (self.width as f32, self.height as f32);
        let coefficient = if self.projection.coefficient.abs() > f32::EPSILON {
            self.projection.coefficient
        } else {
            1.0
        };
        let u = (x - self.projection.x_offset) / coefficient * w + w / 2.0;
        let v = h / 2.0 - (y - self.projection.y_offset) / coefficient * h;
        (u, v)
    }
}

impl OverlayRenderer for SpriteRenderer {
    fn render(&mut self, sample: &OrientationSample) -> Result<Overlay> {
        let (width, height) = (self.width as usize, self.height as usize);
        let mut rgba = vec![0u8; width * height * 4];
        let (sw, sh) = (self.sprite.width() as f32, self.sprite.height() as f32);
        if sw == 0.0 || sh == 0.0 || width == 0 {
            return Overlay::new(self.width, self.height, rgba);
        }

        let (cx, cy) = self.canvas_point(sample.x, sample.y);
        let depth_scale = CAMERA_DISTANCE / (CAMERA_DISTANCE - sample.z).max(1e-3);
        let scale = self.height as f32 * SPRITE_HEIGHT_FRACTION / sh * depth_scale;
        let sx = scale * sample.b.to_radians().cos().abs().max(0.05);
        let sy = scale * sample.a.to_radians().cos().abs().max(0.05);
        let (sin, cos) = sample.c.to_radians().sin_cos();
        let sprite = &self.sprite;

        rgba.par_chunks_exact_mut(width * 4)
            .enumerate()
            .for_each(|(row, dst_row)| {
                let dy = row as f32 + 0.5 - cy;
                for (col, dst) in dst_row.chunks_exact_mut(4).enumerate() {
                    let dx = col as f32 + 0.5 - cx;
                    // Undo the roll, then the scale.
                    let rx = dx * cos + dy * sin;
                    let ry = -dx * sin + dy * cos;
                    let u = rx / sx + sw / 2.0;
                    let v = ry / sy + sh / 2.0;
                    if u < 0.0 || v < 0.0 || u >= sw || v >= sh {
                        continue;
                    }
                    dst.copy_from_slice(&sprite.get_pixel(u as u32, v as u32).0);
                }
            });

        Overlay::new(self.width, self.height, rgba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn projection(width: u32, height: u32) -> Projection {
        Projection {
            width,
            height,
            coefficient: 10.0,
            x_offset: 0.0,
            y_offset: 0.0,
        }
    }

    fn pixel(overlay: &Overlay, x: usize, y: usize) -> [u8; 4] {
        let idx = (y * overlay.width as usize + x) * 4;
        overlay.rgba[idx..idx + 4].try_into().unwrap()
    }

    #[test]
    fn test_centred_sprite() {
        let sprite = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let mut renderer = SpriteRenderer::new(sprite, 20, 20, projection(20, 20));
        let overlay = renderer.render(&OrientationSample::default()).unwrap();
        assert_eq!((overlay.width, overlay.height), (20, 20));
        // Sprite spans 10x10 pixels around the centre.
        assert_eq!(pixel(&overlay, 10, 10), [255, 0, 0, 255]);
        assert_eq!(pixel(&overlay, 5, 5), [255, 0, 0, 255]);
        assert_eq!(pixel(&overlay, 14, 14), [255, 0, 0, 255]);
        assert_eq!(pixel(&overlay, 0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&overlay, 16, 10), [0, 0, 0, 0]);
    }

    #[test]
    fn test_translation_follows_scene_axes() {
        let sprite = RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]));
        let mut renderer = SpriteRenderer::new(sprite, 40, 40, projection(40, 40));
        let sample = OrientationSample {
            x: 2.5,
            y: 2.5,
            ..OrientationSample::default()
        };
        let overlay = renderer.render(&sample).unwrap();
        // Scene +x is right, +y is up: centre moves to (30, 10).
        assert_eq!(pixel(&overlay, 30, 10), [0, 255, 0, 255]);
        assert_eq!(pixel(&overlay, 20, 20), [0, 0, 0, 0]);
    }

    #[test]
    fn test_depth_scales_sprite() {
        let sprite = RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]));
        let mut renderer = SpriteRenderer::new(sprite, 20, 20, projection(20, 20));
        let near = OrientationSample {
            z: 5.0,
            ..OrientationSample::default()
        };
        let overlay = renderer.render(&near).unwrap();
        // Twice as large: now covers nearly the whole canvas.
        assert_eq!(pixel(&overlay, 1, 1), [9, 9, 9, 255]);
    }
}
