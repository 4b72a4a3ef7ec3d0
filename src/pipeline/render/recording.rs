use super::{Color, Surface};
use crate::types::{Frame, Region, Timestamp};

#[derive(Clone, Debug, PartialEq)]
pub enum DrawOp {
    Prepare {
        timestamp: Timestamp,
        clear: bool,
        draw_base: bool,
    },
    Rect {
        region: Region,
        filled: bool,
    },
    Point {
        x: f32,
        y: f32,
        radius: f32,
    },
    Text {
        text: String,
        x: f32,
        y: f32,
    },
}

/// Surface that only records what was drawn on it. Used for headless runs.
#[derive(Clone, Debug, Default)]
pub struct RecordingSurface {
    size: (u32, u32),
    ops: Vec<DrawOp>,
}

impl RecordingSurface {
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<DrawOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Prepare { clear: true, .. }))
            .count()
    }
}

impl Surface for RecordingSurface {
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn prepare(&mut self, frame: &Frame, clear: bool, draw_base: bool) {
        self.ops.push(DrawOp::Prepare {
            timestamp: frame.timestamp,
            clear,
            draw_base,
        });
    }

    fn draw_rect(&mut self, region: Region, _color: Color, filled: bool) {
        self.ops.push(DrawOp::Rect { region, filled });
    }

    fn draw_point(&mut self, x: f32, y: f32, radius: f32, _color: Color) {
        self.ops.push(DrawOp::Point { x, y, radius });
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, _color: Color) {
        self.ops.push(DrawOp::Text {
            text: text.to_string(),
            x,
            y,
        });
    }
}
