//! Makes sure model files exist locally before an engine is built.
//!
//! A model already on disk is used as is. A missing one is fetched from the
//! URL configured for it, written to a sibling `.download` file and renamed
//! into place once complete, so a partial download never masquerades as a
//! model.

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

use crate::{config::ModelSource, types::EngineKind};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelDownloadEvent {
    AlreadyPresent {
        model: EngineKind,
    },
    Started {
        model: EngineKind,
        total: Option<u64>,
    },
    Progress {
        model: EngineKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: EngineKind,
    },
}

fn model_label(model: EngineKind) -> &'static str {
    match model {
        EngineKind::Landmark => "face mesh",
        EngineKind::Object => "object detector",
    }
}

/// Returns the local path of the model for `kind`, downloading it first if
/// needed. A terminal progress bar is shown while downloading.
pub fn ensure_model_ready<F>(
    kind: EngineKind,
    source: &ModelSource,
    mut on_event: F,
) -> anyhow::Result<PathBuf>
where
    F: FnMut(ModelDownloadEvent),
{
    let model_path = source.path.as_path();
    if model_path.is_file() {
        on_event(ModelDownloadEvent::AlreadyPresent { model: kind });
        on_event(ModelDownloadEvent::Finished { model: kind });
        return Ok(model_path.to_path_buf());
    }

    let url = source.url.as_deref().ok_or_else(|| {
        anyhow!(
            "{} model not found at {} and no download url is configured",
            model_label(kind),
            model_path.display()
        )
    })?;

    if let Some(parent) = model_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(kind, url, model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total, .. } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished { model } => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{} model ready", model_label(*model)));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    })
    .with_context(|| {
        format!(
            "failed to download {} model to {}",
            model_label(kind),
            model_path.display()
        )
    })?;

    Ok(model_path.to_path_buf())
}

fn download_to_path<F>(
    model: EngineKind,
    url: &str,
    dest: &Path,
    on_event: &mut F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!(
        "downloading {} model from {url} to {}",
        model_label(model),
        dest.display()
    );

    let client = Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started {
        model,
        total: total_size,
    });

    let tmp_path = dest.with_extension("download");
    stream_to_file(&mut response, total_size, &tmp_path, |downloaded| {
        on_event(ModelDownloadEvent::Progress {
            model,
            downloaded,
            total: total_size,
        })
    })?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "moving {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

/// Copies `reader` into a fresh file at `path` and syncs it. A body shorter
/// or longer than `expected` is an error, and any failure removes the file.
fn stream_to_file<R, F>(
    reader: &mut R,
    expected: Option<u64>,
    path: &Path,
    report: F,
) -> anyhow::Result<()>
where
    R: Read,
    F: FnMut(u64),
{
    let result = write_synced(reader, expected, path, report);
    if result.is_err() && path.exists() {
        if let Err(cleanup) = fs::remove_file(path) {
            log::warn!("could not remove partial download {}: {cleanup}", path.display());
        }
    }
    result
}

fn write_synced<R, F>(
    reader: &mut R,
    expected: Option<u64>,
    path: &Path,
    report: F,
) -> anyhow::Result<()>
where
    R: Read,
    F: FnMut(u64),
{
    let file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = ProgressWriter {
        inner: file,
        written: 0,
        report,
    };
    let copied = io::copy(reader, &mut writer).context("failed while downloading model")?;
    if let Some(expected) = expected.filter(|&expected| expected != copied) {
        return Err(anyhow!("model download truncated: got {copied} of {expected} bytes"));
    }
    writer
        .inner
        .sync_all()
        .context("failed to flush downloaded model to disk")
}

/// Forwards writes and reports the running byte count after each one.
struct ProgressWriter<W, F> {
    inner: W,
    written: u64,
    report: F,
}

impl<W: Write, F: FnMut(u64)> Write for ProgressWriter<W, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        (self.report)(self.written);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.green} downloading model")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
