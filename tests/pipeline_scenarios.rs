use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use facemesh_pipeline::{
    CaptureConstraints, DetectionEngine, DetectionItem, DetectionMode, EngineFactory,
    EngineKind, EngineOptions, Frame, FrameSource, LandmarkSet, PipelineConfig, PipelineError,
    PipelineState, PipelineSupervisor, RecordingSurface, Region, StreamHandle, SurfaceRole,
    Timestamp,
    pipeline::{
        LandmarkBackend, LandmarkEngine, ObjectBackend, ObjectEngine, TickReport,
        render::DrawOp,
    },
    types::Landmark,
};

#[derive(Default)]
struct CameraScript {
    frame: Option<Frame>,
    acquisitions: Vec<CaptureConstraints>,
    releases: usize,
    stream: Option<StreamHandle>,
    next_id: u64,
    fail: bool,
}

#[derive(Clone, Default)]
struct ScriptedCamera(Arc<Mutex<CameraScript>>);

impl ScriptedCamera {
    fn push_frame(&self, millis: u64) {
        let mut script = self.0.lock().unwrap();
        let (width, height) = script
            .stream
            .map(|s| (s.width, s.height))
            .unwrap_or((640, 480));
        script.frame = Some(Frame::blank(width, height, Timestamp::from_millis(millis)));
    }

    fn acquisitions(&self) -> Vec<CaptureConstraints> {
        self.0.lock().unwrap().acquisitions.clone()
    }

    fn releases(&self) -> usize {
        self.0.lock().unwrap().releases
    }

    fn fail_next_acquire(&self, fail: bool) {
        self.0.lock().unwrap().fail = fail;
    }
}

impl FrameSource for ScriptedCamera {
    fn acquire(&mut self, constraints: CaptureConstraints) -> Result<StreamHandle, PipelineError> {
        let mut script = self.0.lock().unwrap();
        script.acquisitions.push(constraints);
        if script.fail {
            return Err(PipelineError::AcquisitionFailed(
                "camera permission denied".to_string(),
            ));
        }
        script.next_id += 1;
        let handle = StreamHandle {
            id: script.next_id,
            width: constraints.width,
            height: constraints.height,
        };
        script.stream = Some(handle);
        Ok(handle)
    }

    fn current_frame(&mut self) -> Option<Frame> {
        let script = self.0.lock().unwrap();
        if script.stream.is_none() {
            return None;
        }
        script.frame.clone()
    }

    fn release(&mut self) {
        let mut script = self.0.lock().unwrap();
        if script.stream.take().is_some() {
            script.releases += 1;
        }
        script.frame = None;
    }

    fn stream(&self) -> Option<StreamHandle> {
        self.0.lock().unwrap().stream
    }
}

struct ScriptedFaces {
    sets: Vec<LandmarkSet>,
    calls: Arc<AtomicUsize>,
    close_error: bool,
    closes: Arc<AtomicUsize>,
}

impl LandmarkBackend for ScriptedFaces {
    fn detect_landmarks(&mut self, _frame: &Frame) -> anyhow::Result<Vec<LandmarkSet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.sets.clone())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.close_error {
            anyhow::bail!("session release failed");
        }
        Ok(())
    }
}

struct ScriptedObjects {
    items: Vec<DetectionItem>,
    gate: Option<Receiver<()>>,
    error: bool,
    calls: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ObjectBackend for ScriptedObjects {
    fn detect_objects(&mut self, _frame: &Frame) -> anyhow::Result<Vec<DetectionItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        if self.error {
            anyhow::bail!("tensor shape mismatch");
        }
        Ok(self.items.clone())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out real engines over scripted backends.
#[derive(Clone, Default)]
struct Models {
    faces: Vec<LandmarkSet>,
    objects: Vec<DetectionItem>,
    object_gate: Option<Receiver<()>>,
    object_error: bool,
    landmark_close_error: bool,
    fail_landmark_init: Arc<AtomicBool>,
    builds: Arc<Mutex<Vec<(EngineKind, EngineOptions)>>>,
    landmark_calls: Arc<AtomicUsize>,
    object_calls: Arc<AtomicUsize>,
    landmark_closes: Arc<AtomicUsize>,
    object_closes: Arc<AtomicUsize>,
}

impl Models {
    fn builds_of(&self, kind: EngineKind) -> usize {
        self.builds
            .lock()
            .unwrap()
            .iter()
            .filter(|(built, _)| *built == kind)
            .count()
    }

    fn gated(mut self) -> (Self, Sender<()>) {
        let (tx, rx) = unbounded();
        self.object_gate = Some(rx);
        (self, tx)
    }
}

impl EngineFactory for Models {
    fn create(
        &self,
        kind: EngineKind,
        options: &EngineOptions,
    ) -> anyhow::Result<Box<dyn DetectionEngine>> {
        if kind == EngineKind::Landmark && self.fail_landmark_init.load(Ordering::SeqCst) {
            anyhow::bail!("face mesh model is corrupt");
        }
        self.builds.lock().unwrap().push((kind, options.clone()));
        Ok(match kind {
            EngineKind::Landmark => Box::new(LandmarkEngine::new(
                ScriptedFaces {
                    sets: self.faces.clone(),
                    calls: self.landmark_calls.clone(),
                    close_error: self.landmark_close_error,
                    closes: self.landmark_closes.clone(),
                },
                options,
            )),
            EngineKind::Object => Box::new(ObjectEngine::new(
                ScriptedObjects {
                    items: self.objects.clone(),
                    gate: self.object_gate.clone(),
                    error: self.object_error,
                    calls: self.object_calls.clone(),
                    closes: self.object_closes.clone(),
                },
                options,
            )),
        })
    }
}

type Supervisor = PipelineSupervisor<ScriptedCamera, Models, RecordingSurface>;

fn face(left: (f32, f32), right: (f32, f32)) -> LandmarkSet {
    let mut points = vec![Landmark::new(0.5, 0.5); 468];
    points[33] = Landmark::new(left.0, left.1);
    points[263] = Landmark::new(right.0, right.1);
    LandmarkSet { points, score: 0.95 }
}

fn object(label: &str, confidence: f32) -> DetectionItem {
    DetectionItem {
        label: label.to_string(),
        confidence,
        region: Region::new(100.0, 120.0, 80.0, 60.0),
    }
}

fn scene() -> Models {
    Models {
        faces: vec![face((0.40, 0.50), (0.50, 0.52)), face((0.60, 0.40), (0.70, 0.42))],
        objects: vec![
            object("person", 0.9),
            object("cup", 0.8),
            object("chair", 0.6),
            object("dog", 0.3),
        ],
        ..Models::default()
    }
}

fn tick_until(supervisor: &mut Supervisor, done: impl Fn(&Supervisor) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(&*supervisor) {
        assert!(Instant::now() < deadline, "condition not reached within 5s");
        supervisor.tick();
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_for(counter: &AtomicUsize, value: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::SeqCst) < value {
        assert!(Instant::now() < deadline, "counter stuck below {value}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn count_ops(ops: &[DrawOp], pred: impl Fn(&DrawOp) -> bool) -> usize {
    ops.iter().filter(|op| pred(op)).count()
}

#[test]
fn shared_canvas_composes_faces_and_objects_with_one_clear() {
    let camera = ScriptedCamera::default();
    let models = scene();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());

    supervisor.start().unwrap();
    assert_eq!(supervisor.state(), PipelineState::Running);
    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);

    let snapshot = supervisor.snapshot();
    assert_eq!(snapshot.timestamp, Some(Timestamp::from_millis(16)));
    assert_eq!(snapshot.faces_detected(), 2);
    assert!((snapshot.head_angle() - 11.31).abs() < 0.05);
    assert_eq!(snapshot.objects_detected(), 3);

    assert_eq!(supervisor.role(EngineKind::Object), Some(SurfaceRole::Primary));
    assert_eq!(supervisor.role(EngineKind::Landmark), Some(SurfaceRole::Secondary));
    let surface = supervisor.surface(EngineKind::Landmark).unwrap();
    let ops = surface.ops();
    assert_eq!(surface.clear_count(), 1);
    assert!(matches!(ops[0], DrawOp::Prepare { clear: true, .. }));
    assert_eq!(count_ops(ops, |op| matches!(op, DrawOp::Rect { filled: false, .. })), 3);
    assert_eq!(count_ops(ops, |op| matches!(op, DrawOp::Point { .. })), 14);
    assert_eq!(count_ops(ops, |op| matches!(op, DrawOp::Text { .. })), 3);
}

#[test]
fn repeated_frame_is_submitted_only_once() {
    let camera = ScriptedCamera::default();
    let models = scene();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());
    supervisor.start().unwrap();

    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);
    for _ in 0..20 {
        supervisor.tick();
    }

    assert_eq!(models.landmark_calls.load(Ordering::SeqCst), 1);
    assert_eq!(models.object_calls.load(Ordering::SeqCst), 1);
    let counters = supervisor.counters(EngineKind::Object);
    assert_eq!(counters.submitted, 1);
    assert_eq!(counters.completed, 1);
    assert!(counters.skipped >= 20);
    assert_eq!(supervisor.snapshot().sequence, 1);
}

#[test]
fn busy_engine_never_receives_a_second_frame() {
    let camera = ScriptedCamera::default();
    let (models, gate) = scene().gated();
    let config = PipelineConfig {
        mode: DetectionMode::Object,
        ..PipelineConfig::default()
    };
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), config);
    supervisor.start().unwrap();

    camera.push_frame(16);
    supervisor.tick();
    wait_for(&models.object_calls, 1);
    for millis in [33, 50, 66] {
        camera.push_frame(millis);
        supervisor.tick();
    }
    assert_eq!(models.object_calls.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.counters(EngineKind::Object).skipped, 3);

    gate.send(()).unwrap();
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);
    assert_eq!(supervisor.snapshot().timestamp, Some(Timestamp::from_millis(16)));

    // The latest frame (66ms) goes next; the skipped ones are never replayed.
    supervisor.tick();
    wait_for(&models.object_calls, 2);
    gate.send(()).unwrap();
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 2);
    assert_eq!(supervisor.snapshot().timestamp, Some(Timestamp::from_millis(66)));
    assert_eq!(supervisor.counters(EngineKind::Object).submitted, 2);
}

#[test]
fn no_draws_or_submissions_after_stop() {
    let camera = ScriptedCamera::default();
    let (models, gate) = scene().gated();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());
    supervisor.start().unwrap();

    camera.push_frame(16);
    supervisor.tick();
    wait_for(&models.object_calls, 1);
    wait_for(&models.landmark_calls, 1);

    supervisor.stop();
    assert_eq!(supervisor.state(), PipelineState::Stopped);
    assert_eq!(camera.releases(), 1);
    assert!(supervisor.engines().is_empty());

    gate.send(()).unwrap();
    thread::sleep(Duration::from_millis(20));
    camera.push_frame(33);
    for _ in 0..5 {
        assert_eq!(supervisor.tick(), TickReport::default());
    }

    let ops = supervisor.surface(EngineKind::Object).unwrap().ops();
    assert!(ops.is_empty(), "drew after stop: {ops:?}");
    assert_eq!(models.object_calls.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.snapshot().sequence, 0);

    supervisor.stop();
    assert_eq!(camera.releases(), 1);
}

#[test]
fn empty_result_still_publishes_a_snapshot() {
    let camera = ScriptedCamera::default();
    let config = PipelineConfig {
        mode: DetectionMode::Object,
        ..PipelineConfig::default()
    };
    let mut supervisor = Supervisor::new(camera.clone(), Models::default(), config);
    assert_eq!(supervisor.snapshot().objects_detected(), 0);

    supervisor.start().unwrap();
    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);

    let stats = supervisor.snapshot().engine(EngineKind::Object);
    assert_eq!(stats.count, 0);
    assert!(stats.items.is_empty());
    assert!(supervisor.snapshot().engines.contains_key(&EngineKind::Object));
}

#[test]
fn inference_failure_skips_the_frame_but_keeps_running() {
    let camera = ScriptedCamera::default();
    let models = Models {
        object_error: true,
        ..scene()
    };
    let config = PipelineConfig {
        mode: DetectionMode::Object,
        ..PipelineConfig::default()
    };
    let mut supervisor = Supervisor::new(camera.clone(), models, config);
    supervisor.start().unwrap();

    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.counters(EngineKind::Object).failed == 1);

    assert_eq!(supervisor.state(), PipelineState::Running);
    assert!(supervisor.last_error().is_none());
    assert_eq!(supervisor.snapshot().objects_detected(), 0);
}

#[test]
fn threshold_change_rebuilds_only_the_object_engine() {
    let camera = ScriptedCamera::default();
    let models = scene();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());
    supervisor.start().unwrap();
    let stream = supervisor.stream().unwrap();

    let mut next = supervisor.config().clone();
    next.object.score_threshold = 0.7;
    supervisor.reconfigure(next).unwrap();

    assert_eq!(supervisor.state(), PipelineState::Running);
    assert_eq!(supervisor.stream(), Some(stream));
    assert_eq!(camera.acquisitions().len(), 1);
    assert_eq!(models.builds_of(EngineKind::Landmark), 1);
    assert_eq!(models.builds_of(EngineKind::Object), 2);

    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);
    assert_eq!(supervisor.snapshot().objects_detected(), 2);
}

#[test]
fn width_change_reacquires_and_rebuilds_everything() {
    let camera = ScriptedCamera::default();
    let models = scene();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());
    supervisor.start().unwrap();
    let first = supervisor.stream().unwrap();

    let mut next = supervisor.config().clone();
    next.width = 1280;
    supervisor.reconfigure(next).unwrap();

    let second = supervisor.stream().unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.width, 1280);
    assert_eq!(camera.releases(), 1);
    assert_eq!(camera.acquisitions()[1].width, 1280);
    assert_eq!(models.builds_of(EngineKind::Landmark), 2);
    assert_eq!(models.builds_of(EngineKind::Object), 2);
    assert_eq!(
        supervisor.surface(EngineKind::Object).unwrap().size(),
        (1280, 480)
    );

    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);
    assert_eq!(supervisor.snapshot().faces_detected(), 2);
}

#[test]
fn mode_change_disposes_removed_engine() {
    let camera = ScriptedCamera::default();
    let models = scene();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());
    supervisor.start().unwrap();

    let mut next = supervisor.config().clone();
    next.mode = DetectionMode::Landmark;
    supervisor.reconfigure(next).unwrap();

    assert_eq!(supervisor.engines(), vec![EngineKind::Landmark]);
    assert_eq!(supervisor.role(EngineKind::Landmark), Some(SurfaceRole::Primary));
    assert!(supervisor.role(EngineKind::Object).is_none());
    assert!(!supervisor.snapshot().engines.contains_key(&EngineKind::Object));
    assert_eq!(camera.acquisitions().len(), 1);
}

#[test]
fn separate_surfaces_each_get_their_own_clear() {
    let camera = ScriptedCamera::default();
    let config = PipelineConfig {
        shared_canvas: false,
        ..PipelineConfig::default()
    };
    let mut supervisor = Supervisor::new(camera.clone(), scene(), config);
    supervisor.start().unwrap();

    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);

    for kind in EngineKind::ALL {
        assert_eq!(supervisor.role(kind), Some(SurfaceRole::Primary));
        assert_eq!(supervisor.surface(kind).unwrap().clear_count(), 1);
    }
    let landmark_ops = supervisor.surface(EngineKind::Landmark).unwrap().ops();
    assert_eq!(count_ops(landmark_ops, |op| matches!(op, DrawOp::Rect { .. })), 0);
}

#[test]
fn engine_init_failure_moves_to_error_until_restarted() {
    let camera = ScriptedCamera::default();
    let models = scene();
    models.fail_landmark_init.store(true, Ordering::SeqCst);
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());

    let err = supervisor.start().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::EngineInitFailed {
            engine: EngineKind::Landmark,
            ..
        }
    ));
    assert_eq!(supervisor.state(), PipelineState::Error);
    assert!(supervisor.last_error().is_some_and(PipelineError::is_fatal));
    assert!(supervisor.stream().is_none());
    assert_eq!(camera.releases(), 1);
    assert_eq!(supervisor.tick(), TickReport::default());

    models.fail_landmark_init.store(false, Ordering::SeqCst);
    supervisor.start().unwrap();
    assert_eq!(supervisor.state(), PipelineState::Running);
    assert!(supervisor.last_error().is_none());
}

#[test]
fn acquisition_failure_is_fatal_and_builds_nothing() {
    let camera = ScriptedCamera::default();
    camera.fail_next_acquire(true);
    let models = scene();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());

    let err = supervisor.start().unwrap_err();
    assert!(matches!(err, PipelineError::AcquisitionFailed(_)));
    assert_eq!(supervisor.state(), PipelineState::Error);
    assert!(models.builds.lock().unwrap().is_empty());
    assert_eq!(camera.acquisitions().len(), 1);
}

#[test]
fn reconfigure_while_stopped_only_stores_config() {
    let camera = ScriptedCamera::default();
    let models = scene();
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());

    let mut next = PipelineConfig::default();
    next.height = 720;
    supervisor.reconfigure(next).unwrap();
    assert_eq!(supervisor.state(), PipelineState::Idle);
    assert!(camera.acquisitions().is_empty());

    let mut invalid = PipelineConfig::default();
    invalid.width = 0;
    assert!(matches!(
        supervisor.reconfigure(invalid),
        Err(PipelineError::InvalidConfig(_))
    ));
    assert_eq!(supervisor.config().height, 720);

    supervisor.start().unwrap();
    assert_eq!(camera.acquisitions()[0].height, 720);
    assert!(matches!(
        supervisor.start(),
        Err(PipelineError::InvalidState { .. })
    ));
}

#[test]
fn failing_engine_disposal_does_not_block_teardown() {
    let camera = ScriptedCamera::default();
    let models = Models {
        landmark_close_error: true,
        ..scene()
    };
    let mut supervisor = Supervisor::new(camera.clone(), models.clone(), PipelineConfig::default());
    supervisor.start().unwrap();
    camera.push_frame(16);
    tick_until(&mut supervisor, |s| s.snapshot().sequence >= 1);

    supervisor.stop();
    assert_eq!(supervisor.state(), PipelineState::Stopped);
    assert!(supervisor.last_error().is_none());
    assert_eq!(camera.releases(), 1);
    wait_for(&models.landmark_closes, 1);
    wait_for(&models.object_closes, 1);

    supervisor.stop();
    assert_eq!(camera.releases(), 1);
    assert_eq!(models.landmark_closes.load(Ordering::SeqCst), 1);
    assert_eq!(models.object_closes.load(Ordering::SeqCst), 1);
}
