use anyhow::Context;

use super::DetectionEngine;
use crate::{
    config::EngineOptions,
    types::{
        Auxiliary, DetectionItem, DetectionResult, EngineKind, FaceLandmarks, Frame, LandmarkSet,
        Region,
    },
};

/// Outer corner of the left eye in the 468-point face mesh.
pub const LEFT_EYE_OUTER: usize = 33;
/// Outer corner of the right eye.
pub const RIGHT_EYE_OUTER: usize = 263;

/// Model side of the landmark engine.
pub trait LandmarkBackend: Send + 'static {
    /// Landmark sets in normalized coordinates, any order.
    fn detect_landmarks(&mut self, frame: &Frame) -> anyhow::Result<Vec<LandmarkSet>>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Roll of the eye line in degrees, or `None` when the set lacks either eye
/// corner.
pub fn head_angle(set: &LandmarkSet) -> Option<f32> {
    let left = set.points.get(LEFT_EYE_OUTER)?;
    let right = set.points.get(RIGHT_EYE_OUTER)?;
    Some((right.y - left.y).atan2(right.x - left.x).to_degrees())
}

/// Keeps at most `max_faces` sets per frame. Sets must reach the detection
/// confidence on a fresh frame; once the previous frame kept a face, the
/// tracking confidence applies instead.
pub struct LandmarkEngine<B: LandmarkBackend> {
    backend: Option<B>,
    max_faces: usize,
    detection_confidence: f32,
    tracking_confidence: f32,
    tracking: bool,
}

impl<B: LandmarkBackend> LandmarkEngine<B> {
    pub fn new(backend: B, options: &EngineOptions) -> Self {
        Self {
            backend: Some(backend),
            max_faces: options.max_results,
            detection_confidence: options.score_threshold,
            tracking_confidence: options.tracking_confidence,
            tracking: false,
        }
    }

    /// Whether the last inference kept at least one face.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    fn min_confidence(&self) -> f32 {
        if self.tracking {
            self.tracking_confidence
        } else {
            self.detection_confidence
        }
    }
}

impl<B: LandmarkBackend> DetectionEngine for LandmarkEngine<B> {
    fn kind(&self) -> EngineKind {
        EngineKind::Landmark
    }

    fn infer(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult> {
        let backend = self
            .backend
            .as_mut()
            .context("landmark engine already disposed")?;
        let sets = backend
            .detect_landmarks(frame)
            .context("landmark backend failed")?;

        let min_confidence = self.min_confidence();
        let (w, h) = (frame.width as f32, frame.height as f32);
        let mut faces = Vec::new();
        let mut items = Vec::new();
        for set in sets {
            if faces.len() == self.max_faces {
                break;
            }
            if set.score < min_confidence {
                continue;
            }
            let Some(angle) = head_angle(&set) else {
                log::debug!(
                    "dropping landmark set with {} points: no eye reference points",
                    set.points.len()
                );
                continue;
            };
            let region = Region::bounding(set.points.iter().map(|p| (p.x * w, p.y * h)))
                .unwrap_or_default();
            items.push(DetectionItem {
                label: "face".to_string(),
                confidence: set.score.clamp(0.0, 1.0),
                region,
            });
            faces.push(FaceLandmarks {
                set,
                head_angle: angle,
            });
        }

        self.tracking = !faces.is_empty();
        Ok(DetectionResult {
            engine: EngineKind::Landmark,
            timestamp: frame.timestamp,
            items,
            aux: Auxiliary::Faces(faces),
        })
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        self.tracking = false;
        match self.backend.take() {
            Some(mut backend) => backend.close(),
            None => Ok(()),
        }
    }
}
