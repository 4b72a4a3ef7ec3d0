use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::Frame;

/// How a frame was scaled and padded into a square model input.
#[derive(Clone, Debug, PartialEq)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    /// Maps a point in model-input pixels back to frame pixels, clamped to the
    /// frame.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let px = (x - self.pad_x) / self.scale;
        let py = (y - self.pad_y) / self.scale;
        (
            px.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            py.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }

    /// Same as [`to_frame`](Self::to_frame) but normalized to `0.0..=1.0`.
    pub fn to_normalized(&self, x: f32, y: f32) -> (f32, f32) {
        let (px, py) = self.to_frame(x, y);
        (
            px / self.orig_w.max(1) as f32,
            py / self.orig_h.max(1) as f32,
        )
    }
}

/// Resizes `frame` to fit a `target_size` square, keeping aspect ratio, and
/// returns an NHWC tensor with channels scaled to `0.0..=1.0`.
pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    let letterbox = letterbox_for(frame.width, frame.height, target_size);
    let canvas = letterbox_rgba(frame, target_size, &letterbox)?;

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((input, letterbox))
}

pub fn letterbox_for(width: u32, height: u32, target_size: u32) -> LetterboxInfo {
    let scale = target_size as f32 / (width.max(height).max(1) as f32);
    let new_w = (width as f32 * scale).round().max(1.0) as u32;
    let new_h = (height as f32 * scale).round().max(1.0) as u32;
    LetterboxInfo {
        scale,
        pad_x: ((target_size as i64 - new_w as i64) / 2).max(0) as f32,
        pad_y: ((target_size as i64 - new_h as i64) / 2).max(0) as f32,
        orig_w: width,
        orig_h: height,
    }
}

fn letterbox_rgba(frame: &Frame, target_size: u32, letterbox: &LetterboxInfo) -> Result<Vec<u8>> {
    if frame.rgba.len() != frame.expected_len() {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            frame.expected_len()
        ));
    }

    let new_w = (frame.width as f32 * letterbox.scale).round().max(1.0) as u32;
    let new_h = (frame.height as f32 * letterbox.scale).round().max(1.0) as u32;

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.to_vec(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    let copy_w = src_stride.min(dst_stride.saturating_sub(pad_x * 4));
    for row in 0..(new_h as usize).min(target_size as usize - pad_y) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + copy_w]
            .copy_from_slice(&resized[src_offset..src_offset + copy_w]);
    }

    Ok(canvas)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
