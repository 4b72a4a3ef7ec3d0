use std::{collections::BTreeMap, fmt};

use crate::types::{DetectionItem, DetectionResult, EngineKind, Timestamp};

/// Display-ready summary of one engine's latest result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineStats {
    pub count: usize,
    pub items: Vec<DetectionItem>,
    /// Landmark engine only: head angle of the last tracked face.
    pub head_angle: Option<f32>,
}

/// Consumer-facing view of the latest composed frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Number of composed frames so far; `0` before the first one.
    pub sequence: u64,
    pub timestamp: Option<Timestamp>,
    pub engines: BTreeMap<EngineKind, EngineStats>,
}

static EMPTY_STATS: EngineStats = EngineStats {
    count: 0,
    items: Vec::new(),
    head_angle: None,
};

impl StatsSnapshot {
    /// Snapshot with a zeroed entry for every active engine.
    pub fn empty(engines: &[EngineKind]) -> Self {
        Self {
            sequence: 0,
            timestamp: None,
            engines: engines
                .iter()
                .map(|&kind| (kind, EngineStats::default()))
                .collect(),
        }
    }

    pub fn engine(&self, kind: EngineKind) -> &EngineStats {
        self.engines.get(&kind).unwrap_or(&EMPTY_STATS)
    }

    pub fn faces_detected(&self) -> usize {
        self.engine(EngineKind::Landmark).count
    }

    pub fn head_angle(&self) -> f32 {
        self.engine(EngineKind::Landmark).head_angle.unwrap_or(0.0)
    }

    pub fn objects_detected(&self) -> usize {
        self.engine(EngineKind::Object).count
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.sequence)?;
        if let Some(timestamp) = self.timestamp {
            write!(f, " @{timestamp}")?;
        }
        for (kind, stats) in &self.engines {
            match kind {
                EngineKind::Landmark => write!(
                    f,
                    " faces={} head_angle={:.1}°",
                    stats.count,
                    stats.head_angle.unwrap_or(0.0)
                )?,
                EngineKind::Object => {
                    write!(f, " objects={}", stats.count)?;
                    let labels: Vec<&str> =
                        stats.items.iter().map(|item| item.label.as_str()).collect();
                    if !labels.is_empty() {
                        write!(f, " [{}]", labels.join(", "))?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pure conversion of engine results into snapshot entries.
pub struct StatsAggregator;

impl StatsAggregator {
    pub fn partial(result: &DetectionResult) -> EngineStats {
        match result.engine {
            EngineKind::Landmark => {
                let faces = result.faces();
                EngineStats {
                    count: faces.len(),
                    items: result.items.clone(),
                    head_angle: faces.last().map(|face| face.head_angle),
                }
            }
            EngineKind::Object => EngineStats {
                count: result.items.len(),
                items: result.items.clone(),
                head_angle: None,
            },
        }
    }

    /// Merges the latest partial of each active engine. Engines without a
    /// result yet keep a zeroed entry.
    pub fn merge<'a, I>(
        sequence: u64,
        timestamp: Timestamp,
        active: &[EngineKind],
        results: I,
    ) -> StatsSnapshot
    where
        I: IntoIterator<Item = &'a DetectionResult>,
    {
        let mut snapshot = StatsSnapshot::empty(active);
        snapshot.sequence = sequence;
        snapshot.timestamp = Some(timestamp);
        for result in results {
            if active.contains(&result.engine) {
                snapshot
                    .engines
                    .insert(result.engine, Self::partial(result));
            }
        }
        snapshot
    }
}
