use super::{Color, Surface};
use crate::types::{DetectionItem, DetectionResult, EngineKind, FaceLandmarks, Frame, Region};

/// Eye corners, mouth corners and chin of the 468-point mesh.
pub const FACE_KEY_POINTS: [usize; 7] = [33, 133, 362, 263, 61, 291, 199];

const FACE_POINT_RADIUS: f32 = 2.0;
const FACE_POINT_COLOR: Color = [255, 64, 64, 255];
const BOX_COLOR: Color = [0, 255, 0, 255];
const LABEL_TEXT_COLOR: Color = [0, 0, 0, 255];
const LABEL_BAR_HEIGHT: f32 = 20.0;
const LABEL_CHAR_WIDTH: f32 = 7.0;
const LABEL_PADDING: f32 = 5.0;

pub fn draw_result<S: Surface + ?Sized>(surface: &mut S, frame: &Frame, result: &DetectionResult) {
    match result.engine {
        EngineKind::Landmark => {
            for face in result.faces() {
                draw_face(surface, frame, face);
            }
        }
        EngineKind::Object => {
            for item in &result.items {
                draw_object(surface, item);
            }
        }
    }
}

fn draw_face<S: Surface + ?Sized>(surface: &mut S, frame: &Frame, face: &FaceLandmarks) {
    let (w, h) = (frame.width as f32, frame.height as f32);
    for point in FACE_KEY_POINTS
        .iter()
        .filter_map(|&index| face.set.points.get(index))
    {
        surface.draw_point(point.x * w, point.y * h, FACE_POINT_RADIUS, FACE_POINT_COLOR);
    }
}

/// Percentage label shown on object boxes, e.g. `cup (87%)`.
pub fn object_label(item: &DetectionItem) -> String {
    format!("{} ({}%)", item.label, (item.confidence * 100.0).round() as i32)
}

fn draw_object<S: Surface + ?Sized>(surface: &mut S, item: &DetectionItem) {
    surface.draw_rect(item.region, BOX_COLOR, false);

    let text = object_label(item);
    let bar_y = (item.region.y - LABEL_BAR_HEIGHT).max(0.0);
    let bar = Region::new(
        item.region.x,
        bar_y,
        text.chars().count() as f32 * LABEL_CHAR_WIDTH + 2.0 * LABEL_PADDING,
        LABEL_BAR_HEIGHT,
    );
    surface.draw_rect(bar, BOX_COLOR, true);
    surface.draw_text(
        &text,
        item.region.x + LABEL_PADDING,
        bar_y + LABEL_BAR_HEIGHT - LABEL_PADDING,
        LABEL_TEXT_COLOR,
    );
}
