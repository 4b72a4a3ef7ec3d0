use anyhow::Context;

use super::DetectionEngine;
use crate::{
    config::EngineOptions,
    types::{DetectionItem, DetectionResult, EngineKind, Frame},
};

/// Model side of the object engine.
pub trait ObjectBackend: Send + 'static {
    /// Raw detections in frame pixel coordinates, unfiltered.
    fn detect_objects(&mut self, frame: &Frame) -> anyhow::Result<Vec<DetectionItem>>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct ObjectEngine<B: ObjectBackend> {
    backend: Option<B>,
    score_threshold: f32,
    max_results: usize,
}

impl<B: ObjectBackend> ObjectEngine<B> {
    pub fn new(backend: B, options: &EngineOptions) -> Self {
        Self {
            backend: Some(backend),
            score_threshold: options.score_threshold,
            max_results: options.max_results,
        }
    }
}

impl<B: ObjectBackend> DetectionEngine for ObjectEngine<B> {
    fn kind(&self) -> EngineKind {
        EngineKind::Object
    }

    fn infer(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult> {
        let backend = self
            .backend
            .as_mut()
            .context("object engine already disposed")?;
        let mut items: Vec<DetectionItem> = backend
            .detect_objects(frame)
            .context("object backend failed")?
            .into_iter()
            .filter(|item| item.confidence >= self.score_threshold)
            .collect();
        items.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        items.truncate(self.max_results);

        Ok(DetectionResult {
            items,
            ..DetectionResult::empty(EngineKind::Object, frame.timestamp)
        })
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        match self.backend.take() {
            Some(mut backend) => backend.close(),
            None => Ok(()),
        }
    }
}
