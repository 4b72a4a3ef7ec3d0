use std::{
    collections::{BTreeMap, BTreeSet},
    ops::ControlFlow,
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, select};

use super::{
    camera::{CaptureConstraints, FrameSource, StreamHandle},
    engine::{Admission, Completion, EngineCounters, EngineFactory, EngineWorker},
    render::{RecordingSurface, RenderCoordinator, Surface},
};
use crate::{
    config::PipelineConfig,
    error::PipelineError,
    stats::{StatsAggregator, StatsSnapshot},
    types::{DetectionResult, EngineKind, Frame, SurfaceRole, Timestamp},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Acquiring,
    Ready,
    Loading,
    Running,
    Reconfiguring,
    Stopping,
    Stopped,
    Error,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle | Stopped | Error, Acquiring)
                | (Acquiring, Ready)
                | (Ready, Loading)
                | (Loading, Running)
                | (Running, Reconfiguring)
                | (Reconfiguring, Running)
                | (Acquiring | Loading | Running | Reconfiguring, Error)
                | (Running | Reconfiguring | Error, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// What one call to [`PipelineSupervisor::tick`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub submitted: usize,
    pub completed: usize,
    pub composed: usize,
}

struct PendingFrame {
    frame: Frame,
    awaiting: BTreeSet<EngineKind>,
}

/// Drives the frame loop and owns the camera stream and engine lifetimes.
///
/// Everything happens on the caller's thread except inference, which runs on
/// one worker per engine. Results are only ever applied from [`tick`], so
/// once [`stop`] returns nothing is drawn or submitted again.
///
/// [`tick`]: PipelineSupervisor::tick
/// [`stop`]: PipelineSupervisor::stop
pub struct PipelineSupervisor<Src, F, S = RecordingSurface>
where
    Src: FrameSource,
    F: EngineFactory,
    S: Surface + Default,
{
    source: Src,
    factory: F,
    config: PipelineConfig,
    state: PipelineState,
    last_error: Option<PipelineError>,
    stream: Option<StreamHandle>,
    workers: BTreeMap<EngineKind, EngineWorker>,
    counters: BTreeMap<EngineKind, EngineCounters>,
    coordinator: Option<RenderCoordinator<S>>,
    latest: BTreeMap<EngineKind, Arc<DetectionResult>>,
    pending: BTreeMap<Timestamp, PendingFrame>,
    snapshot: StatsSnapshot,
    sequence: u64,
}

impl<Src, F, S> PipelineSupervisor<Src, F, S>
where
    Src: FrameSource,
    F: EngineFactory,
    S: Surface + Default,
{
    pub fn new(source: Src, factory: F, config: PipelineConfig) -> Self {
        let snapshot = StatsSnapshot::empty(config.engines());
        Self {
            source,
            factory,
            config,
            state: PipelineState::Idle,
            last_error: None,
            stream: None,
            workers: BTreeMap::new(),
            counters: BTreeMap::new(),
            coordinator: None,
            latest: BTreeMap::new(),
            pending: BTreeMap::new(),
            snapshot,
            sequence: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The fault that moved the pipeline into `Error`, if any.
    pub fn last_error(&self) -> Option<&PipelineError> {
        self.last_error.as_ref()
    }

    pub fn stream(&self) -> Option<StreamHandle> {
        self.stream
    }

    /// Latest published snapshot. Always present; zeroed before the first
    /// composed frame.
    pub fn snapshot(&self) -> &StatsSnapshot {
        &self.snapshot
    }

    pub fn counters(&self, kind: EngineKind) -> EngineCounters {
        self.counters.get(&kind).copied().unwrap_or_default()
    }

    /// Engines with a live worker.
    pub fn engines(&self) -> Vec<EngineKind> {
        self.workers.keys().copied().collect()
    }

    pub fn coordinator(&self) -> Option<&RenderCoordinator<S>> {
        self.coordinator.as_ref()
    }

    pub fn role(&self, kind: EngineKind) -> Option<SurfaceRole> {
        self.coordinator.as_ref()?.role(kind)
    }

    pub fn surface(&self, kind: EngineKind) -> Option<&S> {
        self.coordinator.as_ref()?.surface(kind)
    }

    pub fn surface_mut(&mut self, kind: EngineKind) -> Option<&mut S> {
        self.coordinator.as_mut()?.surface_mut(kind)
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Idle | PipelineState::Stopped | PipelineState::Error => {}
            state => {
                return Err(PipelineError::InvalidState {
                    operation: "start",
                    state,
                });
            }
        }
        self.config.validate()?;

        self.last_error = None;
        self.counters.clear();
        self.latest.clear();
        self.pending.clear();
        self.sequence = 0;
        self.snapshot = StatsSnapshot::empty(self.config.engines());

        self.transition(PipelineState::Acquiring);
        let stream = match self.source.acquire(self.constraints()) {
            Ok(stream) => stream,
            Err(err) => return Err(self.fail(err)),
        };
        self.stream = Some(stream);
        self.transition(PipelineState::Ready);

        self.relayout(stream);
        self.transition(PipelineState::Loading);
        for &kind in self.config.engines() {
            if let Err(err) = self.build_engine(kind) {
                return Err(self.fail(err));
            }
        }

        self.transition(PipelineState::Running);
        log::info!(
            "pipeline running: {}x{} mode={} shared_canvas={}",
            stream.width,
            stream.height,
            self.config.mode,
            self.config.shared_canvas
        );
        Ok(())
    }

    /// Collects finished inferences, composes frames whose engines have all
    /// answered and submits the current camera frame to idle engines.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if self.state != PipelineState::Running {
            return report;
        }

        let completions: Vec<Completion> = self
            .workers
            .values_mut()
            .filter_map(EngineWorker::poll)
            .collect();
        for completion in completions {
            report.completed += 1;
            if self.apply_completion(completion) {
                report.composed += 1;
            }
        }

        let Some(frame) = self.source.current_frame() else {
            return report;
        };
        let mut admitted = BTreeSet::new();
        for (&kind, worker) in self.workers.iter_mut() {
            let counters = self.counters.entry(kind).or_default();
            match worker.submit(&frame) {
                Ok(Admission::Admitted) => {
                    counters.submitted += 1;
                    admitted.insert(kind);
                }
                Ok(Admission::Busy | Admission::Stale) => counters.skipped += 1,
                Err(err) => {
                    counters.failed += 1;
                    log::warn!("{kind} submission failed at {}: {err:#}", frame.timestamp);
                }
            }
        }
        report.submitted = admitted.len();
        if !admitted.is_empty() {
            self.pending
                .entry(frame.timestamp)
                .or_insert_with(|| PendingFrame {
                    frame: frame.clone(),
                    awaiting: BTreeSet::new(),
                })
                .awaiting
                .extend(admitted);
        }

        report
    }

    /// Returns whether this completion finished a composed frame.
    fn apply_completion(&mut self, completion: Completion) -> bool {
        let Completion {
            engine,
            timestamp,
            outcome,
        } = completion;
        let counters = self.counters.entry(engine).or_default();
        match outcome {
            Ok(result) => {
                counters.completed += 1;
                self.latest.insert(engine, Arc::new(result));
            }
            Err(reason) => {
                counters.failed += 1;
                let err = PipelineError::InferenceFailed {
                    engine,
                    timestamp,
                    reason,
                };
                log::warn!("{err}; frame skipped");
            }
        }

        let Some(pending) = self.pending.get_mut(&timestamp) else {
            return false;
        };
        pending.awaiting.remove(&engine);
        if !pending.awaiting.is_empty() {
            return false;
        }
        let frame = pending.frame.clone();
        self.compose(&frame);
        true
    }

    fn compose(&mut self, frame: &Frame) {
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.compose(frame, &self.latest);
        }
        // Older frames still awaiting an engine can no longer be published.
        self.pending = self.pending.split_off(&frame.timestamp);
        self.pending.remove(&frame.timestamp);

        self.sequence += 1;
        self.snapshot = StatsAggregator::merge(
            self.sequence,
            frame.timestamp,
            self.config.engines(),
            self.latest.values().map(Arc::as_ref),
        );
        log::trace!("composed frame {}: {}", frame.timestamp, self.snapshot);
    }

    /// Applies a new config. While running only what changed is torn down and
    /// rebuilt; otherwise the config is just stored for the next `start`.
    pub fn reconfigure(&mut self, next: PipelineConfig) -> Result<(), PipelineError> {
        next.validate()?;
        match self.state {
            PipelineState::Running => {}
            PipelineState::Idle | PipelineState::Stopped | PipelineState::Error => {
                self.config = next;
                return Ok(());
            }
            state => {
                return Err(PipelineError::InvalidState {
                    operation: "reconfigure",
                    state,
                });
            }
        }

        let change = self.config.diff(&next);
        self.config = next;
        if change.is_empty() {
            return Ok(());
        }
        self.transition(PipelineState::Reconfiguring);
        log::info!("reconfiguring pipeline: {change:?}");
        self.pending.clear();

        for kind in change.removed.iter().chain(&change.rebuild) {
            if let Some(worker) = self.workers.remove(kind) {
                worker.shutdown();
            }
            self.latest.remove(kind);
        }
        for kind in &change.removed {
            self.counters.remove(kind);
        }

        if change.reacquire {
            self.source.release();
            self.stream = None;
            match self.source.acquire(self.constraints()) {
                Ok(stream) => self.stream = Some(stream),
                Err(err) => return Err(self.fail(err)),
            }
        }

        for &kind in change.rebuild.iter().chain(&change.added) {
            if let Err(err) = self.build_engine(kind) {
                return Err(self.fail(err));
            }
        }

        if change.relayout {
            if let Some(stream) = self.stream {
                self.relayout(stream);
            }
        }
        let timestamp = self.snapshot.timestamp;
        self.snapshot = StatsAggregator::merge(
            self.sequence,
            timestamp.unwrap_or(Timestamp::ZERO),
            self.config.engines(),
            self.latest.values().map(Arc::as_ref),
        );
        self.snapshot.timestamp = timestamp;

        self.transition(PipelineState::Running);
        Ok(())
    }

    /// Disposes every engine and releases the camera. Safe to call in any
    /// state; a stopped or idle pipeline is left as is.
    pub fn stop(&mut self) {
        if matches!(self.state, PipelineState::Idle | PipelineState::Stopped) {
            return;
        }
        self.transition(PipelineState::Stopping);
        self.teardown();
        self.transition(PipelineState::Stopped);
        log::info!("pipeline stopped");
    }

    /// Ticks at `refresh` until `shutdown` fires, `on_snapshot` breaks or the
    /// pipeline leaves `Running`, then stops.
    pub fn run<C>(
        &mut self,
        refresh: Duration,
        shutdown: &Receiver<()>,
        mut on_snapshot: C,
    ) -> Result<(), PipelineError>
    where
        C: FnMut(&StatsSnapshot) -> ControlFlow<()>,
    {
        if self.state != PipelineState::Running {
            return Err(PipelineError::InvalidState {
                operation: "run",
                state: self.state,
            });
        }

        let ticker = crossbeam_channel::tick(refresh);
        loop {
            select! {
                recv(shutdown) -> _ => {
                    log::info!("shutdown requested");
                    break;
                }
                recv(ticker) -> _ => {
                    let report = self.tick();
                    if report.composed > 0 && on_snapshot(&self.snapshot).is_break() {
                        break;
                    }
                    if self.state != PipelineState::Running {
                        break;
                    }
                }
            }
        }

        self.stop();
        Ok(())
    }

    fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.config.width,
            height: self.config.height,
        }
    }

    fn relayout(&mut self, stream: StreamHandle) {
        self.coordinator = Some(RenderCoordinator::new(
            self.config.engines(),
            self.config.shared_canvas,
            stream.width,
            stream.height,
        ));
    }

    fn build_engine(&mut self, kind: EngineKind) -> Result<(), PipelineError> {
        let options = self.config.engine_options(kind);
        let engine = self
            .factory
            .create(kind, &options)
            .map_err(|err| PipelineError::init_failed(kind, &err))?;
        let worker =
            EngineWorker::spawn(engine).map_err(|err| PipelineError::init_failed(kind, &err))?;
        self.workers.insert(kind, worker);
        self.counters.entry(kind).or_default();
        log::info!("{kind} engine ready");
        Ok(())
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        log::error!("pipeline failed: {err}");
        self.teardown();
        self.transition(PipelineState::Error);
        self.last_error = Some(err.clone());
        err
    }

    fn teardown(&mut self) {
        for (_, worker) in std::mem::take(&mut self.workers) {
            worker.shutdown();
        }
        self.pending.clear();
        self.latest.clear();
        self.source.release();
        self.stream = None;
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        log::debug!("pipeline {:?} -> {next:?}", self.state);
        self.state = next;
    }
}

impl<Src, F, S> Drop for PipelineSupervisor<Src, F, S>
where
    Src: FrameSource,
    F: EngineFactory,
    S: Surface + Default,
{
    fn drop(&mut self) {
        if !self.workers.is_empty() || self.stream.is_some() {
            self.teardown();
        }
    }
}
