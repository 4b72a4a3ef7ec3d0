use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, bounded};

use super::rgba_converter::{self, PixelLayout, RgbaFrame};
use crate::{
    error::PipelineError,
    types::{Frame, Timestamp},
};

/// Requested capture size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
}

/// Identifies one acquisition generation of a camera stream, together with
/// the dimensions the device actually delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

/// Owner of the camera stream.
///
/// `acquire` must fully release any previous stream first, and `release` must
/// be safe to call any number of times.
pub trait FrameSource {
    fn acquire(&mut self, constraints: CaptureConstraints) -> Result<StreamHandle, PipelineError>;
    /// Latest frame, or `None` until the stream produced one.
    fn current_frame(&mut self) -> Option<Frame>;
    fn release(&mut self);
    fn stream(&self) -> Option<StreamHandle>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn acquire(&mut self, constraints: CaptureConstraints) -> Result<StreamHandle, PipelineError> {
        (**self).acquire(constraints)
    }

    fn current_frame(&mut self) -> Option<Frame> {
        (**self).current_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn stream(&self) -> Option<StreamHandle> {
        (**self).stream()
    }
}

const CAPTURE_RETRY_BASE: Duration = Duration::from_millis(5);
const CAPTURE_RETRY_MAX: Duration = Duration::from_millis(250);

/// Pause before the next read after `failures` consecutive failed reads.
fn capture_retry_delay(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    CAPTURE_RETRY_BASE
        .saturating_mul(1 << shift)
        .min(CAPTURE_RETRY_MAX)
}

/// An opened camera device. Lives on the capture thread only.
pub trait CameraDriver {
    fn resolution(&self) -> (u32, u32);
    /// Blocks until the next frame is available.
    fn capture(&mut self) -> Result<RgbaFrame>;
}

/// Opens a device for one acquisition. Called on the capture thread because
/// some backends hand out devices that cannot cross threads.
pub trait CameraOpener: Send + Sync + 'static {
    type Driver: CameraDriver;

    fn label(&self) -> String;
    fn open(&self, constraints: &CaptureConstraints) -> Result<Self::Driver>;
}

/// Camera-backed [`FrameSource`]: one capture thread per acquisition feeding
/// a single-slot channel. Frames arriving while the slot is full are dropped.
pub struct CameraSource<O: CameraOpener> {
    opener: Arc<O>,
    stream: Option<CameraStream>,
    latest: Option<Frame>,
    next_id: u64,
}

struct CameraStream {
    handle: StreamHandle,
    frame_rx: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<O: CameraOpener> CameraSource<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener: Arc::new(opener),
            stream: None,
            latest: None,
            next_id: 1,
        }
    }

    pub fn label(&self) -> String {
        self.opener.label()
    }
}

impl<O: CameraOpener> FrameSource for CameraSource<O> {
    fn acquire(&mut self, constraints: CaptureConstraints) -> Result<StreamHandle, PipelineError> {
        self.release();

        let (ready_tx, ready_rx) = bounded::<Result<(u32, u32), String>>(1);
        let (frame_tx, frame_rx) = bounded::<Frame>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let opener = self.opener.clone();
        let label = opener.label();

        let thread = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                let mut driver = match opener.open(&constraints) {
                    Ok(driver) => driver,
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!("{err:#}")));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(driver.resolution()));
                drop(ready_tx);

                let started = Instant::now();
                let mut failures = 0u32;
                while !stop_flag.load(Ordering::Relaxed) {
                    let frame_start = Instant::now();
                    let converted = match driver.capture() {
                        Ok(converted) => {
                            if failures > 0 {
                                log::info!("camera recovered after {failures} failed reads");
                            }
                            failures = 0;
                            converted
                        }
                        Err(err) => {
                            failures = failures.saturating_add(1);
                            if failures.is_power_of_two() {
                                log::warn!(
                                    "camera frame read failed {failures} times in a row (last after {:?}): {err:#}",
                                    frame_start.elapsed()
                                );
                            }
                            thread::sleep(capture_retry_delay(failures));
                            continue;
                        }
                    };

                    let frame = Frame::new(
                        converted.rgba,
                        converted.width,
                        converted.height,
                        Timestamp::from_duration(started.elapsed()),
                    );
                    // Drop if the consumer has not picked up the previous frame yet.
                    let _ = frame_tx.try_send(frame);
                }
            })
            .map_err(|err| PipelineError::AcquisitionFailed(format!("{label}: {err}")))?;

        let (width, height) = match ready_rx.recv() {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(reason)) => {
                let _ = thread.join();
                return Err(PipelineError::AcquisitionFailed(format!("{label}: {reason}")));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(PipelineError::AcquisitionFailed(format!(
                    "{label}: capture thread exited before reporting stream metadata"
                )));
            }
        };

        let handle = StreamHandle {
            id: self.next_id,
            width,
            height,
        };
        self.next_id += 1;
        log::info!(
            "camera {label} acquired: stream #{} at {width}x{height}",
            handle.id
        );

        self.stream = Some(CameraStream {
            handle,
            frame_rx,
            stop,
            thread: Some(thread),
        });
        Ok(handle)
    }

    fn current_frame(&mut self) -> Option<Frame> {
        let stream = self.stream.as_ref()?;
        while let Ok(newer) = stream.frame_rx.try_recv() {
            self.latest = Some(newer);
        }
        self.latest.clone()
    }

    fn release(&mut self) {
        self.latest = None;
        if let Some(stream) = self.stream.take() {
            let id = stream.handle.id;
            stream.stop();
            log::info!("camera stream #{id} released");
        }
    }

    fn stream(&self) -> Option<StreamHandle> {
        self.stream.as_ref().map(|stream| stream.handle)
    }
}

impl<O: CameraOpener> Drop for CameraSource<O> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Test-pattern camera: a gradient with a bar sweeping across it, paced to a
/// fixed frame rate.
#[derive(Clone, Debug)]
pub struct SyntheticCamera {
    pub fps: u32,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self { fps: 30 }
    }
}

pub struct SyntheticDriver {
    width: u32,
    height: u32,
    interval: Duration,
    next_deadline: Instant,
    tick: u64,
}

impl CameraOpener for SyntheticCamera {
    type Driver = SyntheticDriver;

    fn label(&self) -> String {
        format!("synthetic@{}fps", self.fps)
    }

    fn open(&self, constraints: &CaptureConstraints) -> Result<SyntheticDriver> {
        if self.fps == 0 {
            return Err(anyhow!("synthetic camera needs a non-zero frame rate"));
        }
        if constraints.width == 0 || constraints.height == 0 {
            return Err(anyhow!(
                "unsupported capture size {}x{}",
                constraints.width,
                constraints.height
            ));
        }
        Ok(SyntheticDriver {
            width: constraints.width,
            height: constraints.height,
            interval: Duration::from_secs(1) / self.fps,
            next_deadline: Instant::now(),
            tick: 0,
        })
    }
}

impl CameraDriver for SyntheticDriver {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self) -> Result<RgbaFrame> {
        let now = Instant::now();
        if self.next_deadline > now {
            thread::sleep(self.next_deadline - now);
        }
        self.next_deadline += self.interval;

        let (w, h) = (self.width as usize, self.height as usize);
        let bar = (self.tick as usize * 4) % w.max(1);
        let mut rgb = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                if x.abs_diff(bar) < 4 {
                    rgb.extend_from_slice(&[255, 255, 255]);
                } else {
                    rgb.extend_from_slice(&[(x * 255 / w) as u8, (y * 255 / h.max(1)) as u8, 96]);
                }
            }
        }
        self.tick += 1;

        rgba_converter::convert_raw(PixelLayout::Rgb, &rgb, self.width, self.height)
    }
}
