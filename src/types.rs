use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;

/// Capture time of a frame, measured from the start of its camera stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub fn from_duration(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0.as_secs_f64() * 1_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}ms", self.as_millis_f64())
    }
}

/// One captured camera image. Pixels are RGBA8 and shared, never copied, when
/// the frame is handed to engines.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Timestamp,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32, timestamp: Timestamp) -> Self {
        Self {
            rgba: rgba.into(),
            width,
            height,
            timestamp,
        }
    }

    /// Opaque black frame.
    pub fn blank(width: u32, height: u32, timestamp: Timestamp) -> Self {
        let mut rgba = vec![0u8; width as usize * height as usize * 4];
        for px in rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self::new(rgba, width, height, timestamp)
    }

    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    /// Smallest region containing every point, or `None` for no points.
    pub fn bounding<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f32, f32)>,
    {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Self::from_corners(min_x, min_y, max_x, max_y))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionItem {
    pub label: String,
    pub confidence: f32,
    pub region: Region,
}

/// A landmark in normalized image coordinates (`0.0..=1.0` on both axes).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// All landmarks of one tracked face.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    pub points: Vec<Landmark>,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    pub set: LandmarkSet,
    /// Roll of the eye line in degrees.
    pub head_angle: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Auxiliary {
    #[default]
    None,
    Faces(Vec<FaceLandmarks>),
}

/// Output of one inference call. Never mutated once published.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub engine: EngineKind,
    pub timestamp: Timestamp,
    pub items: Vec<DetectionItem>,
    pub aux: Auxiliary,
}

impl DetectionResult {
    pub fn empty(engine: EngineKind, timestamp: Timestamp) -> Self {
        Self {
            engine,
            timestamp,
            items: Vec::new(),
            aux: Auxiliary::None,
        }
    }

    pub fn faces(&self) -> &[FaceLandmarks] {
        match &self.aux {
            Auxiliary::Faces(faces) => faces,
            Auxiliary::None => &[],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Landmark,
    Object,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Landmark, EngineKind::Object];

    pub fn label(&self) -> &'static str {
        match self {
            EngineKind::Landmark => "landmark",
            EngineKind::Object => "object",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which engine may clear and repaint the base image on a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceRole {
    Primary,
    Secondary,
}

impl SurfaceRole {
    /// `(clear, draw_base)` flags this role passes to `Surface::prepare`.
    pub fn prepare_flags(&self) -> (bool, bool) {
        match self {
            SurfaceRole::Primary => (true, true),
            SurfaceRole::Secondary => (false, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_region_spans_all_points() {
        let region = Region::bounding([(10.0, 40.0), (30.0, 20.0), (20.0, 60.0)]).unwrap();
        assert_eq!(region, Region::new(10.0, 20.0, 20.0, 40.0));
        assert!(Region::bounding(std::iter::empty()).is_none());
    }

    #[test]
    fn timestamps_order_by_capture_time() {
        assert!(Timestamp::from_millis(16) < Timestamp::from_millis(33));
        assert_eq!(Timestamp::from_millis(16).to_string(), "16.0ms");
    }

    #[test]
    fn blank_frame_is_opaque() {
        let frame = Frame::blank(2, 2, Timestamp::ZERO);
        assert_eq!(frame.rgba.len(), frame.expected_len());
        assert!(frame.rgba.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }
}
