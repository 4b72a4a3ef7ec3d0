mod args;

use std::{
    ops::ControlFlow,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use facemesh_pipeline::{
    CameraSource, EngineKind, FrameSource, PipelineSupervisor, RgbaCanvas, SyntheticCamera,
    pipeline::engine::ort::OrtEngineFactory,
};

use args::Args;

const REFRESH_INTERVAL: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.pipeline_config()?;
    let shared = config.shared_canvas;
    let source = open_source(args.synthetic)?;

    let mut supervisor: PipelineSupervisor<_, _, RgbaCanvas> =
        PipelineSupervisor::new(source, OrtEngineFactory, config);
    supervisor.start()?;

    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        log::info!("interrupt received, stopping pipeline");
        let _ = shutdown_tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    let limit = args.frames;
    let mut composed = 0u64;
    supervisor.run(REFRESH_INTERVAL, &shutdown_rx, |snapshot| {
        composed += 1;
        log::info!("{snapshot}");
        if limit.is_some_and(|limit| composed >= limit) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    for kind in EngineKind::ALL {
        let counters = supervisor.counters(kind);
        if counters.submitted > 0 {
            log::info!("{kind} engine: {counters:?}");
        }
    }

    if let Some(dump) = &args.dump {
        let Some(coordinator) = supervisor.coordinator() else {
            log::warn!("nothing was composed; skipping canvas dump");
            return Ok(());
        };
        let mut written = Vec::new();
        for assignment in coordinator.assignments() {
            if written.contains(&assignment.surface) {
                continue;
            }
            if let Some(canvas) = coordinator.surfaces().get(assignment.surface) {
                let path = dump_path(dump, assignment.engine, shared);
                canvas.save_png(&path)?;
                log::info!("canvas written to {}", path.display());
                written.push(assignment.surface);
            }
        }
    }

    Ok(())
}

fn open_source(synthetic: bool) -> Result<Box<dyn FrameSource>> {
    if synthetic {
        return Ok(synthetic_source());
    }
    open_camera()
}

fn synthetic_source() -> Box<dyn FrameSource> {
    let source = CameraSource::new(SyntheticCamera::default());
    log::info!("using camera {}", source.label());
    Box::new(source)
}

#[cfg(feature = "camera-nokhwa")]
fn open_camera() -> Result<Box<dyn FrameSource>> {
    use facemesh_pipeline::pipeline::nokhwa_camera::NokhwaCamera;

    let source = CameraSource::new(NokhwaCamera::first_available()?);
    log::info!("using camera {}", source.label());
    Ok(Box::new(source))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn open_camera() -> Result<Box<dyn FrameSource>> {
    log::warn!("built without camera support, using the synthetic test pattern");
    Ok(synthetic_source())
}

/// `out.png` on a shared canvas, `out-landmark.png`/`out-object.png` otherwise.
fn dump_path(base: &Path, kind: EngineKind, shared: bool) -> PathBuf {
    if shared {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "canvas".to_string());
    base.with_file_name(format!("{stem}-{kind}.png"))
}
