//! Frame scheduling and shared-surface coordination for live face-mesh and
//! object-detection pipelines.
//!
//! A [`PipelineSupervisor`] pulls frames from a [`FrameSource`], hands them to
//! one worker thread per [`DetectionEngine`] without ever overlapping calls to
//! the same engine, composites every engine's overlay through a
//! [`RenderCoordinator`] and publishes a merged [`StatsSnapshot`] once per
//! composed frame.

pub mod config;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod stats;
pub mod types;

pub use config::{DetectionMode, EngineOptions, ModelSource, PipelineConfig};
pub use error::PipelineError;
pub use pipeline::{
    CameraSource, CaptureConstraints, DetectionEngine, EngineFactory, FrameSource,
    PipelineState, PipelineSupervisor, RecordingSurface, RenderCoordinator, RgbaCanvas,
    StreamHandle, Surface, SyntheticCamera,
};
pub use stats::{EngineStats, StatsAggregator, StatsSnapshot};
pub use types::{
    DetectionItem, DetectionResult, EngineKind, Frame, Landmark, LandmarkSet, Region, SurfaceRole,
    Timestamp,
};
