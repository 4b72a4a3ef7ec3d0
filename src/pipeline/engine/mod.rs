//! Detection engines and the worker threads that run them.
//!
//! Every engine lives on its own worker thread fed through single-slot
//! channels. The supervisor talks to it only through [`EngineWorker`], whose
//! [`InFlightGuard`] makes sure at most one inference is outstanding and that
//! a frame whose timestamp did not advance is never submitted twice.

pub mod common;
pub mod landmark;
pub mod object;
#[cfg(feature = "backend-ort")]
pub mod ort;

use std::thread;

use anyhow::anyhow;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

pub use self::{
    landmark::{LandmarkBackend, LandmarkEngine, head_angle},
    object::{ObjectBackend, ObjectEngine},
};
use crate::{
    config::EngineOptions,
    error::PipelineError,
    types::{DetectionResult, EngineKind, Frame, Timestamp},
};

/// Stateful capability wrapping a pretrained model.
pub trait DetectionEngine: Send + 'static {
    fn kind(&self) -> EngineKind;
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult>;
    /// Idempotent, best-effort.
    fn dispose(&mut self) -> anyhow::Result<()>;
}

/// Builds engines for the supervisor ("init").
pub trait EngineFactory {
    fn create(
        &self,
        kind: EngineKind,
        options: &EngineOptions,
    ) -> anyhow::Result<Box<dyn DetectionEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(EngineKind, &EngineOptions) -> anyhow::Result<Box<dyn DetectionEngine>>,
{
    fn create(
        &self,
        kind: EngineKind,
        options: &EngineOptions,
    ) -> anyhow::Result<Box<dyn DetectionEngine>> {
        self(kind, options)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// An inference is still outstanding.
    Busy,
    /// Same timestamp as the last submitted frame.
    Stale,
}

/// Single-slot in-flight tracker for one engine instance.
#[derive(Clone, Debug, Default)]
pub struct InFlightGuard {
    outstanding: Option<Timestamp>,
    last_submitted: Option<Timestamp>,
}

impl InFlightGuard {
    pub fn admit(&mut self, timestamp: Timestamp) -> Admission {
        if self.outstanding.is_some() {
            return Admission::Busy;
        }
        if self.last_submitted == Some(timestamp) {
            return Admission::Stale;
        }
        self.outstanding = Some(timestamp);
        self.last_submitted = Some(timestamp);
        Admission::Admitted
    }

    /// Frees the slot if `timestamp` is the outstanding call.
    pub fn release(&mut self, timestamp: Timestamp) -> bool {
        if self.outstanding == Some(timestamp) {
            self.outstanding = None;
            true
        } else {
            false
        }
    }

    pub fn outstanding(&self) -> Option<Timestamp> {
        self.outstanding
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Result of one inference call delivered back from a worker thread.
#[derive(Debug)]
pub struct Completion {
    pub engine: EngineKind,
    pub timestamp: Timestamp,
    pub outcome: Result<DetectionResult, String>,
}

/// Handle to an engine running on its own thread.
///
/// Dropping the handle closes both channels: the worker finishes whatever it
/// is running, drops the result, disposes the engine and exits.
pub struct EngineWorker {
    kind: EngineKind,
    job_tx: Option<Sender<Frame>>,
    result_rx: Receiver<Completion>,
    handle: Option<thread::JoinHandle<()>>,
    guard: InFlightGuard,
}

impl EngineWorker {
    pub fn spawn(engine: Box<dyn DetectionEngine>) -> anyhow::Result<Self> {
        let kind = engine.kind();
        let (job_tx, job_rx) = bounded::<Frame>(1);
        let (result_tx, result_rx) = bounded::<Completion>(1);

        let handle = thread::Builder::new()
            .name(format!("{kind}-engine"))
            .spawn(move || run_worker_loop(engine, job_rx, result_tx))
            .map_err(|err| anyhow!("failed to spawn {kind} worker thread: {err}"))?;

        Ok(Self {
            kind,
            job_tx: Some(job_tx),
            result_rx,
            handle: Some(handle),
            guard: InFlightGuard::default(),
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn is_busy(&self) -> bool {
        self.guard.outstanding().is_some()
    }

    /// Hands `frame` to the engine if the in-flight guard admits it.
    pub fn submit(&mut self, frame: &Frame) -> anyhow::Result<Admission> {
        let admission = self.guard.admit(frame.timestamp);
        if admission != Admission::Admitted {
            return Ok(admission);
        }

        let job_tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| anyhow!("{} worker already shut down", self.kind))?;
        match job_tx.try_send(frame.clone()) {
            Ok(()) => Ok(Admission::Admitted),
            Err(TrySendError::Full(_)) => {
                self.guard.release(frame.timestamp);
                Err(anyhow!("{} job slot unexpectedly full", self.kind))
            }
            Err(TrySendError::Disconnected(_)) => {
                self.guard.release(frame.timestamp);
                Err(anyhow!("{} worker thread has exited", self.kind))
            }
        }
    }

    /// Non-blocking check for a finished inference.
    pub fn poll(&mut self) -> Option<Completion> {
        match self.result_rx.try_recv() {
            Ok(completion) => {
                self.guard.release(completion.timestamp);
                Some(completion)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Closes the worker. An idle worker is joined, so its engine is disposed
    /// before this returns; a busy one disposes as soon as its inference
    /// returns and its result is discarded.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.job_tx.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(timestamp) = self.guard.outstanding() {
            log::warn!(
                "{} engine busy with frame {timestamp}; disposal deferred until it returns",
                self.kind
            );
            return;
        }
        if handle.join().is_err() {
            log::warn!("{} worker thread panicked", self.kind);
        }
    }
}

impl Drop for EngineWorker {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker_loop(
    mut engine: Box<dyn DetectionEngine>,
    job_rx: Receiver<Frame>,
    result_tx: Sender<Completion>,
) {
    let kind = engine.kind();

    while let Ok(frame) = job_rx.recv() {
        let outcome = engine.infer(&frame).map_err(|err| format!("{err:#}"));
        let completion = Completion {
            engine: kind,
            timestamp: frame.timestamp,
            outcome,
        };
        if result_tx.send(completion).is_err() {
            log::debug!(
                "{kind} result for frame {} discarded after cancellation",
                frame.timestamp
            );
            break;
        }
    }

    match engine.dispose() {
        Ok(()) => log::info!("{kind} engine disposed"),
        Err(err) => {
            let fault = PipelineError::DisposalFault {
                resource: format!("{kind} engine"),
                reason: format!("{err:#}"),
            };
            log::warn!("{fault}");
        }
    }
}
