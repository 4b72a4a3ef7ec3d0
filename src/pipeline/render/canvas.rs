use std::path::Path;

use anyhow::Context;
use image::{Rgba, RgbaImage};

use super::{Color, Surface};
use crate::types::{Frame, Region};

const RECT_THICKNESS: i32 = 2;

/// Text drawn on the canvas, kept as an annotation for the presentation layer
/// to render with a real font.
#[derive(Clone, Debug, PartialEq)]
pub struct TextLabel {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub color: Color,
}

/// RGBA pixel canvas.
#[derive(Clone, Debug)]
pub struct RgbaCanvas {
    image: RgbaImage,
    labels: Vec<TextLabel>,
}

impl Default for RgbaCanvas {
    fn default() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            labels: Vec::new(),
        }
    }
}

impl RgbaCanvas {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn labels(&self) -> &[TextLabel] {
        &self.labels
    }

    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to write canvas to {}", path.display()))
    }

    fn draw_line(&mut self, p0: (f32, f32), p1: (f32, f32), color: Color, thickness: i32) {
        let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
        let (x1, y1) = (p1.0 as i32, p1.1 as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let radius = (thickness.max(1) - 1) / 2;

        loop {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox.abs() + oy.abs() <= radius {
                        self.put_pixel_safe(x0 + ox, y0 + oy, color);
                    }
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn put_pixel_safe(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.image.width() || uy >= self.image.height() {
            return;
        }
        self.image.put_pixel(ux, uy, Rgba(color));
    }
}

impl Surface for RgbaCanvas {
    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
            self.labels.clear();
        }
    }

    fn prepare(&mut self, frame: &Frame, clear: bool, draw_base: bool) {
        if clear {
            self.labels.clear();
            for px in self.image.pixels_mut() {
                *px = Rgba([0, 0, 0, 0]);
            }
        }
        if draw_base {
            if self.image.dimensions() != (frame.width, frame.height) {
                self.resize(frame.width, frame.height);
            }
            if frame.rgba.len() == frame.expected_len() {
                self.image.copy_from_slice(&frame.rgba);
            } else {
                log::warn!(
                    "skipping base image: frame buffer is {} bytes, expected {}",
                    frame.rgba.len(),
                    frame.expected_len()
                );
            }
        }
    }

    fn draw_rect(&mut self, region: Region, color: Color, filled: bool) {
        let (x1, y1) = (region.x, region.y);
        let (x2, y2) = (region.x + region.width, region.y + region.height);
        if filled {
            for y in y1 as i32..=y2 as i32 {
                for x in x1 as i32..=x2 as i32 {
                    self.put_pixel_safe(x, y, color);
                }
            }
            return;
        }
        self.draw_line((x1, y1), (x2, y1), color, RECT_THICKNESS);
        self.draw_line((x2, y1), (x2, y2), color, RECT_THICKNESS);
        self.draw_line((x2, y2), (x1, y2), color, RECT_THICKNESS);
        self.draw_line((x1, y2), (x1, y1), color, RECT_THICKNESS);
    }

    fn draw_point(&mut self, x: f32, y: f32, radius: f32, color: Color) {
        let (cx, cy) = (x as i32, y as i32);
        let r = radius.max(0.0).round() as i32;
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy <= r * r {
                    self.put_pixel_safe(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, color: Color) {
        self.labels.push(TextLabel {
            text: text.to_string(),
            x,
            y,
            color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn red_frame(w: u32, h: u32) -> Frame {
        let rgba = [255u8, 0, 0, 255].repeat((w * h) as usize);
        Frame::new(rgba, w, h, Timestamp::ZERO)
    }

    #[test]
    fn prepare_paints_frame_and_drops_old_labels() {
        let mut canvas = RgbaCanvas::default();
        canvas.resize(4, 4);
        canvas.draw_text("stale", 0.0, 0.0, [0, 0, 0, 255]);

        canvas.prepare(&red_frame(4, 4), true, true);
        assert!(canvas.labels().is_empty());
        assert_eq!(canvas.image().get_pixel(3, 3), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn overlay_only_prepare_keeps_existing_pixels() {
        let mut canvas = RgbaCanvas::default();
        canvas.resize(4, 4);
        canvas.prepare(&red_frame(4, 4), true, true);
        canvas.draw_point(1.0, 1.0, 0.0, [0, 255, 0, 255]);

        canvas.prepare(&Frame::blank(4, 4, Timestamp::ZERO), false, false);
        assert_eq!(canvas.image().get_pixel(1, 1), &Rgba([0, 255, 0, 255]));
        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn shapes_are_clipped_to_the_canvas() {
        let mut canvas = RgbaCanvas::default();
        canvas.resize(8, 8);
        canvas.draw_rect(Region::new(-4.0, -4.0, 20.0, 20.0), [1, 2, 3, 255], true);
        canvas.draw_point(7.0, 7.0, 3.0, [9, 9, 9, 255]);
        assert_eq!(canvas.image().get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
        assert_eq!(canvas.image().get_pixel(7, 7), &Rgba([9, 9, 9, 255]));
    }
}
