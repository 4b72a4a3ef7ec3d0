use std::{collections::BTreeSet, fmt, fs, path::Path, path::PathBuf, str::FromStr};

use anyhow::Context;
use serde::Deserialize;

use crate::{error::PipelineError, types::EngineKind};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_MAX_FACES: usize = 10;
const DEFAULT_MIN_DETECTION_CONFIDENCE: f32 = 0.5;
const DEFAULT_MIN_TRACKING_CONFIDENCE: f32 = 0.5;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_MAX_RESULTS: usize = 5;
const FACE_MESH_MODEL_FILENAME: &str = "face_mesh.onnx";
const OBJECT_DETECTOR_MODEL_FILENAME: &str = "efficientdet_lite0.onnx";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    #[serde(alias = "face")]
    Landmark,
    Object,
    #[default]
    Both,
}

impl DetectionMode {
    pub fn engines(&self) -> &'static [EngineKind] {
        match self {
            DetectionMode::Landmark => &[EngineKind::Landmark],
            DetectionMode::Object => &[EngineKind::Object],
            DetectionMode::Both => &EngineKind::ALL,
        }
    }

    pub fn includes(&self, kind: EngineKind) -> bool {
        self.engines().contains(&kind)
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "landmark" | "face" => Ok(DetectionMode::Landmark),
            "object" => Ok(DetectionMode::Object),
            "both" => Ok(DetectionMode::Both),
            other => Err(format!(
                "unknown detection mode `{other}` (expected landmark, object or both)"
            )),
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectionMode::Landmark => "landmark",
            DetectionMode::Object => "object",
            DetectionMode::Both => "both",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Delegate {
    Cpu,
    #[default]
    Gpu,
}

/// Where a model file lives, and where to fetch it from when it is missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    pub path: PathBuf,
    pub url: Option<String>,
}

impl ModelSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            url: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LandmarkOptions {
    pub max_faces: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub model: ModelSource,
}

impl Default for LandmarkOptions {
    fn default() -> Self {
        Self {
            max_faces: DEFAULT_MAX_FACES,
            min_detection_confidence: DEFAULT_MIN_DETECTION_CONFIDENCE,
            min_tracking_confidence: DEFAULT_MIN_TRACKING_CONFIDENCE,
            model: ModelSource::local(PathBuf::from("models").join(FACE_MESH_MODEL_FILENAME)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ObjectOptions {
    pub score_threshold: f32,
    pub max_results: usize,
    pub model: ModelSource,
}

impl Default for ObjectOptions {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
            model: ModelSource::local(
                PathBuf::from("models").join(OBJECT_DETECTOR_MODEL_FILENAME),
            ),
        }
    }
}

/// Immutable pipeline settings. Replacing the config on a running pipeline
/// triggers reconfiguration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub width: u32,
    pub height: u32,
    pub mode: DetectionMode,
    pub shared_canvas: bool,
    pub delegate: Delegate,
    pub landmark: LandmarkOptions,
    pub object: ObjectOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            mode: DetectionMode::default(),
            shared_canvas: true,
            delegate: Delegate::default(),
            landmark: LandmarkOptions::default(),
            object: ObjectOptions::default(),
        }
    }
}

/// Options handed to an engine at init time.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineOptions {
    pub model: ModelSource,
    pub delegate: Delegate,
    pub score_threshold: f32,
    pub max_results: usize,
    /// Only meaningful for the landmark engine.
    pub tracking_confidence: f32,
}

/// What has to be torn down and rebuilt to go from one config to the next.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigChange {
    pub reacquire: bool,
    pub rebuild: BTreeSet<EngineKind>,
    pub added: BTreeSet<EngineKind>,
    pub removed: BTreeSet<EngineKind>,
    pub relayout: bool,
}

impl ConfigChange {
    pub fn is_empty(&self) -> bool {
        !self.reacquire
            && !self.relayout
            && self.rebuild.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = toml::from_str(raw).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "frame size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        let thresholds = [
            ("landmark.min_detection_confidence", self.landmark.min_detection_confidence),
            ("landmark.min_tracking_confidence", self.landmark.min_tracking_confidence),
            ("object.score_threshold", self.object.score_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.landmark.max_faces == 0 {
            return Err(PipelineError::InvalidConfig(
                "landmark.max_faces must be at least 1".to_string(),
            ));
        }
        if self.object.max_results == 0 {
            return Err(PipelineError::InvalidConfig(
                "object.max_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engines(&self) -> &'static [EngineKind] {
        self.mode.engines()
    }

    pub fn engine_options(&self, kind: EngineKind) -> EngineOptions {
        match kind {
            EngineKind::Landmark => EngineOptions {
                model: self.landmark.model.clone(),
                delegate: self.delegate,
                score_threshold: self.landmark.min_detection_confidence,
                max_results: self.landmark.max_faces,
                tracking_confidence: self.landmark.min_tracking_confidence,
            },
            EngineKind::Object => EngineOptions {
                model: self.object.model.clone(),
                delegate: self.delegate,
                score_threshold: self.object.score_threshold,
                max_results: self.object.max_results,
                tracking_confidence: 0.0,
            },
        }
    }

    /// Dimension changes force a new camera stream and rebuild every engine;
    /// option changes only rebuild the engines they belong to.
    pub fn diff(&self, next: &PipelineConfig) -> ConfigChange {
        let before: BTreeSet<EngineKind> = self.engines().iter().copied().collect();
        let after: BTreeSet<EngineKind> = next.engines().iter().copied().collect();
        let kept: BTreeSet<EngineKind> = before.intersection(&after).copied().collect();

        let reacquire = self.width != next.width || self.height != next.height;
        let rebuild = if reacquire || self.delegate != next.delegate {
            kept
        } else {
            kept.into_iter()
                .filter(|kind| match kind {
                    EngineKind::Landmark => self.landmark != next.landmark,
                    EngineKind::Object => self.object != next.object,
                })
                .collect()
        };
        let added: BTreeSet<EngineKind> = after.difference(&before).copied().collect();
        let removed: BTreeSet<EngineKind> = before.difference(&after).copied().collect();
        let relayout = reacquire
            || self.shared_canvas != next.shared_canvas
            || !added.is_empty()
            || !removed.is_empty();

        ConfigChange {
            reacquire,
            rebuild,
            added,
            removed,
            relayout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let config = PipelineConfig::default();
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.mode, DetectionMode::Both);
        assert_eq!(config.landmark.max_faces, 10);
        assert_eq!(config.object.max_results, 5);
        assert_eq!(config.delegate, Delegate::Gpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            width = 1280
            height = 720
            mode = "object"
            delegate = "CPU"

            [object]
            score_threshold = 0.3
            model = { path = "models/custom.onnx", url = "https://example.invalid/custom.onnx" }
            "#,
        )
        .unwrap();

        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.mode, DetectionMode::Object);
        assert_eq!(config.delegate, Delegate::Cpu);
        assert_eq!(config.object.score_threshold, 0.3);
        assert_eq!(config.object.max_results, 5);
        assert_eq!(config.object.model.path, PathBuf::from("models/custom.onnx"));
        assert_eq!(config.landmark, LandmarkOptions::default());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = PipelineConfig::from_toml_str("[object]\nscore_threshold = 1.5\n").unwrap_err();
        assert!(format!("{err:#}").contains("object.score_threshold"));
    }

    #[test]
    fn threshold_change_rebuilds_only_object_engine() {
        let before = PipelineConfig::default();
        let mut after = before.clone();
        after.object.score_threshold = 0.7;

        let change = before.diff(&after);
        assert!(!change.reacquire);
        assert!(!change.relayout);
        assert_eq!(change.rebuild.into_iter().collect::<Vec<_>>(), vec![EngineKind::Object]);
    }

    #[test]
    fn dimension_change_reacquires_and_rebuilds_everything() {
        let before = PipelineConfig::default();
        let mut after = before.clone();
        after.width = 1280;

        let change = before.diff(&after);
        assert!(change.reacquire);
        assert!(change.relayout);
        assert_eq!(change.rebuild.len(), 2);
    }

    #[test]
    fn mode_change_adds_and_removes_engines() {
        let mut before = PipelineConfig::default();
        before.mode = DetectionMode::Landmark;
        let mut after = before.clone();
        after.mode = DetectionMode::Object;

        let change = before.diff(&after);
        assert!(change.added.contains(&EngineKind::Object));
        assert!(change.removed.contains(&EngineKind::Landmark));
        assert!(change.rebuild.is_empty());
        assert!(change.relayout);
    }

    #[test]
    fn identical_configs_produce_no_change() {
        let config = PipelineConfig::default();
        assert!(config.diff(&config.clone()).is_empty());
    }

    #[test]
    fn detection_mode_parses_aliases() {
        assert_eq!("face".parse::<DetectionMode>(), Ok(DetectionMode::Landmark));
        assert_eq!("BOTH".parse::<DetectionMode>(), Ok(DetectionMode::Both));
        assert!("hands".parse::<DetectionMode>().is_err());
    }
}
