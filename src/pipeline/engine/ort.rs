//! ONNX Runtime backends for both engines.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    DetectionEngine, EngineFactory, LandmarkBackend, LandmarkEngine, ObjectBackend, ObjectEngine,
    common::{self, LetterboxInfo},
};
use crate::{
    config::{Delegate, EngineOptions},
    model_download::ensure_model_ready,
    types::{DetectionItem, EngineKind, Frame, Landmark, LandmarkSet, Region},
};

pub const FACE_MESH_INPUT_SIZE: u32 = 192;
pub const FACE_MESH_LANDMARKS: usize = 468;
pub const OBJECT_INPUT_SIZE: u32 = 320;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

fn build_session(model_path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;
    Ok(session)
}

/// Single-face mesh regressor: 468 landmarks plus a face-presence logit.
pub struct OrtFaceMesh {
    session: Session,
}

impl OrtFaceMesh {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: build_session(model_path)?,
        })
    }
}

impl LandmarkBackend for OrtFaceMesh {
    fn detect_landmarks(&mut self, frame: &Frame) -> Result<Vec<LandmarkSet>> {
        let (input, letterbox) = common::prepare_frame_with_size(frame, FACE_MESH_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run face mesh session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "face mesh returned {} outputs, expected landmarks and score",
                outputs.len()
            ));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flat: Vec<f32> = coords.iter().copied().collect();
        let logit = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| anyhow!("face mesh score output is empty"))?;

        Ok(vec![decode_face_mesh(&flat, logit, &letterbox)?])
    }
}

/// Maps raw mesh output (input-pixel xyz triples) into a normalized set.
pub fn decode_face_mesh(flat: &[f32], logit: f32, letterbox: &LetterboxInfo) -> Result<LandmarkSet> {
    if flat.len() < FACE_MESH_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected face mesh length: got {}, need {}",
            flat.len(),
            FACE_MESH_LANDMARKS * 3
        ));
    }

    let points = flat
        .chunks_exact(3)
        .take(FACE_MESH_LANDMARKS)
        .map(|xyz| {
            let (x, y) = letterbox.to_normalized(xyz[0], xyz[1]);
            Landmark {
                x,
                y,
                z: xyz[2] / FACE_MESH_INPUT_SIZE as f32,
            }
        })
        .collect();

    Ok(LandmarkSet {
        points,
        score: common::sigmoid(logit),
    })
}

/// SSD-style detector with post-processed outputs: boxes, classes, scores.
pub struct OrtObjectDetector {
    session: Session,
}

impl OrtObjectDetector {
    pub fn new(model_path: &Path) -> Result<Self> {
        Ok(Self {
            session: build_session(model_path)?,
        })
    }
}

impl ObjectBackend for OrtObjectDetector {
    fn detect_objects(&mut self, frame: &Frame) -> Result<Vec<DetectionItem>> {
        let (input, letterbox) = common::prepare_frame_with_size(frame, OBJECT_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run object detector session")?;

        if outputs.len() < 3 {
            return Err(anyhow!(
                "object detector returned {} outputs, expected boxes, classes and scores",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let classes = outputs[1].try_extract_array::<f32>()?;
        let scores = outputs[2].try_extract_array::<f32>()?;

        decode_detections(
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("detector boxes not contiguous"))?,
            classes
                .as_slice()
                .ok_or_else(|| anyhow!("detector classes not contiguous"))?,
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("detector scores not contiguous"))?,
            &letterbox,
            OBJECT_INPUT_SIZE,
        )
    }
}

/// Boxes are `[ymin, xmin, ymax, xmax]` normalized to the model input.
pub fn decode_detections(
    boxes: &[f32],
    classes: &[f32],
    scores: &[f32],
    letterbox: &LetterboxInfo,
    input_size: u32,
) -> Result<Vec<DetectionItem>> {
    let count = scores.len().min(classes.len());
    if boxes.len() < count * 4 {
        return Err(anyhow!(
            "detector returned {} box values for {count} detections",
            boxes.len()
        ));
    }

    let size = input_size as f32;
    Ok((0..count)
        .map(|i| {
            let b = &boxes[i * 4..i * 4 + 4];
            let (x1, y1) = letterbox.to_frame(b[1] * size, b[0] * size);
            let (x2, y2) = letterbox.to_frame(b[3] * size, b[2] * size);
            DetectionItem {
                label: class_label(classes[i]),
                confidence: scores[i].clamp(0.0, 1.0),
                region: Region::from_corners(x1, y1, x2, y2),
            }
        })
        .collect())
}

fn class_label(class: f32) -> String {
    let id = class.round().max(0.0) as usize;
    COCO_LABELS
        .get(id)
        .map(|label| label.to_string())
        .unwrap_or_else(|| format!("class {id}"))
}

/// Builds ORT-backed engines, fetching model files on first use.
#[derive(Clone, Debug, Default)]
pub struct OrtEngineFactory;

impl EngineFactory for OrtEngineFactory {
    fn create(&self, kind: EngineKind, options: &EngineOptions) -> Result<Box<dyn DetectionEngine>> {
        let model_path = ensure_model_ready(kind, &options.model, |_evt| {})?;
        if options.delegate == Delegate::Gpu {
            log::info!("{kind} engine: GPU delegate requested, running on the CPU execution provider");
        }

        let engine: Box<dyn DetectionEngine> = match kind {
            EngineKind::Landmark => {
                Box::new(LandmarkEngine::new(OrtFaceMesh::new(&model_path)?, options))
            }
            EngineKind::Object => {
                Box::new(ObjectEngine::new(OrtObjectDetector::new(&model_path)?, options))
            }
        };
        log::info!("{kind} ORT backend ready using {}", model_path.display());
        Ok(engine)
    }
}
