pub mod camera;
pub mod engine;
#[cfg(feature = "camera-nokhwa")]
pub mod nokhwa_camera;
pub mod render;
pub mod rgba_converter;
pub mod supervisor;

// Re-exports for convenience
pub use camera::{
    CameraDriver, CameraOpener, CameraSource, CaptureConstraints, FrameSource, StreamHandle,
    SyntheticCamera,
};
pub use engine::{
    Admission, DetectionEngine, EngineCounters, EngineFactory, InFlightGuard, LandmarkBackend,
    LandmarkEngine, ObjectBackend, ObjectEngine,
};
pub use render::{RecordingSurface, RenderCoordinator, RgbaCanvas, Surface};
pub use supervisor::{PipelineState, PipelineSupervisor, TickReport};
