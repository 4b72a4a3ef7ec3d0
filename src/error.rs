use thiserror::Error;

use crate::{
    pipeline::PipelineState,
    types::{EngineKind, Timestamp},
};

/// Faults that cross the supervisor boundary.
///
/// Only [`PipelineError::AcquisitionFailed`] and
/// [`PipelineError::EngineInitFailed`] are fatal: they move the pipeline into
/// `Error` and require an explicit restart. Inference and disposal faults are
/// absorbed where they happen and only show up in logs and counters.
#[derive(Clone, Debug, Error)]
pub enum PipelineError {
    #[error("camera acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("{engine} engine failed to initialize: {reason}")]
    EngineInitFailed { engine: EngineKind, reason: String },

    #[error("{engine} inference failed at {timestamp}: {reason}")]
    InferenceFailed {
        engine: EngineKind,
        timestamp: Timestamp,
        reason: String,
    },

    #[error("failed to dispose {resource}: {reason}")]
    DisposalFault { resource: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("`{operation}` is not allowed while the pipeline is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::AcquisitionFailed(_) | PipelineError::EngineInitFailed { .. }
        )
    }

    pub(crate) fn init_failed(engine: EngineKind, err: &anyhow::Error) -> Self {
        PipelineError::EngineInitFailed {
            engine,
            reason: format!("{err:#}"),
        }
    }
}
