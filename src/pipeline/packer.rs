//! RGB to packed YUYV (4:2:2) conversion for the virtual camera.
//!
//! Each pair of horizontally adjacent pixels becomes four bytes,
//! `[Y0, Cb, Y1, Cr]`: luma for both pixels and one chroma pair computed from
//! their average colour. Full-range BT.601 coefficients are used, matching
//! the JPEG colorspace the device is configured with.

use anyhow::{Result, anyhow};
use rayon::prelude::*;

use crate::types::{Frame, quantize};

pub const BYTES_PER_PIXEL: usize = 2;

pub fn packed_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

fn chroma(r: f32, g: f32, b: f32) -> (f32, f32) {
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (cb, cr)
}

fn pack_pair(dst: &mut [u8], p0: &[u8], p1: &[u8]) {
    let [r0, g0, b0] = [p0[0] as f32, p0[1] as f32, p0[2] as f32];
    let [r1, g1, b1] = [p1[0] as f32, p1[1] as f32, p1[2] as f32];
    let (cb, cr) = chroma((r0 + r1) * 0.5, (g0 + g1) * 0.5, (b0 + b1) * 0.5);
    dst[0] = quantize(luma(r0, g0, b0));
    dst[1] = quantize(cb);
    dst[2] = quantize(luma(r1, g1, b1));
    dst[3] = quantize(cr);
}

/// Pack `frame` into `out`, which must be exactly `width * height * 2` bytes.
pub fn pack_into(frame: &Frame, out: &mut [u8]) -> Result<()> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    if width % 2 != 0 {
        return Err(anyhow!("YUYV needs an even width, got {width}"));
    }
    if frame.rgb.len() != width * height * 3 {
        return Err(anyhow!(
            "RGB buffer size mismatch: got {}, expected {}",
            frame.rgb.len(),
            width * height * 3
        ));
    }
    let expected = packed_len(frame.width, frame.height);
    if out.len() != expected {
        return Err(anyhow!(
            "YUYV buffer size mismatch: got {}, expected {expected}",
            out.len()
        ));
    }
    if width == 0 || height == 0 {
        return Ok(());
    }

    out.par_chunks_exact_mut(width * BYTES_PER_PIXEL)
        .zip(frame.rgb.par_chunks_exact(width * 3))
        .for_each(|(dst_row, src_row)| {
            for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(6)) {
                pack_pair(dst, &src[..3], &src[3..]);
            }
        });
    Ok(())
}

#[allow(dead_code)]
pub fn pack(frame: &Frame) -> Result<Vec<u8>> {
    let mut out = vec![0u8; packed_len(frame.width, frame.height)];
    pack_into(frame, &mut out)?;
    Ok(out)
}
