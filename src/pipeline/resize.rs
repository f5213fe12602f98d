use anyhow::{Context, Result};
use fast_image_resize as fir;

fn resize_pixels(
    data: Vec<u8>,
    width: u32,
    height: u32,
    target_w: u32,
    target_h: u32,
    pixel_type: fir::PixelType,
) -> Result<Vec<u8>> {
    if (width, height) == (target_w, target_h) {
        return Ok(data);
    }

    let src_image = fir::images::Image::from_vec_u8(width, height, data, pixel_type)?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, pixel_type);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    Ok(dst_image.into_vec())
}

pub fn resize_rgb(
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    target_w: u32,
    target_h: u32,
) -> Result<Vec<u8>> {
    resize_pixels(rgb, width, height, target_w, target_h, fir::PixelType::U8x3)
}

pub fn resize_rgba(
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    target_w: u32,
    target_h: u32,
) -> Result<Vec<u8>> {
    resize_pixels(rgba, width, height, target_w, target_h, fir::PixelType::U8x4)
}

pub fn resize_gray(
    gray: Vec<u8>,
    width: u32,
    height: u32,
    target_w: u32,
    target_h: u32,
) -> Result<Vec<u8>> {
    resize_pixels(gray, width, height, target_w, target_h, fir::PixelType::U8)
}
