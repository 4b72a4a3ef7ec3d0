use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use facemesh_pipeline::{DetectionMode, PipelineConfig};

/// Live face-mesh and object detection over a camera feed.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML pipeline config; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Requested capture width
    #[arg(long, value_name = "PIXELS")]
    pub width: Option<u32>,

    /// Requested capture height
    #[arg(long, value_name = "PIXELS")]
    pub height: Option<u32>,

    /// Engines to run: landmark, object or both
    #[arg(long, value_name = "MODE")]
    pub mode: Option<DetectionMode>,

    /// Stop after this many composed frames
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Use the built-in test pattern instead of a camera
    #[arg(long)]
    pub synthetic: bool,

    /// Write the last composed canvas as PNG on exit
    #[arg(long, value_name = "FILE")]
    pub dump: Option<PathBuf>,
}

impl Args {
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        config.validate()?;
        Ok(config)
    }
}
