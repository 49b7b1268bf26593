//! Training modes and the warm-start sequence they imply.

use crate::error::TrainError;
use crate::training::checkpoint::Checkpoint;
use crate::training::params::{FrozenProposal, ParameterLayout, ParameterStore, SubNetwork};
use crate::training::stats::TrainingStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

/// Which sub-networks receive updates. Fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainingMode {
    #[serde(rename = "onlyPnet")]
    OnlyPnet,
    #[serde(rename = "onlyCnet")]
    OnlyCnet,
    #[default]
    #[serde(rename = "both")]
    Both,
}

impl TrainingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlyPnet => "onlyPnet",
            Self::OnlyCnet => "onlyCnet",
            Self::Both => "both",
        }
    }

    /// Flat-buffer ranges the optimizer may write.
    pub fn trainable_ranges(&self, layout: &ParameterLayout) -> Vec<Range<usize>> {
        match self {
            Self::OnlyPnet => vec![layout.pnet.clone()],
            Self::OnlyCnet => vec![layout.cnet.clone()],
            Self::Both => vec![layout.pnet.clone(), layout.cnet.clone()],
        }
    }

    /// Whether classification output is scored against ground truth.
    pub fn scores_classification(&self) -> bool {
        !matches!(self, Self::OnlyPnet)
    }

    pub fn needs_frozen_proposal(&self) -> bool {
        matches!(self, Self::OnlyCnet)
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingMode {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onlyPnet" => Ok(Self::OnlyPnet),
            "onlyCnet" => Ok(Self::OnlyCnet),
            "both" => Ok(Self::Both),
            other => Err(TrainError::config(format!(
                "unknown training mode '{other}' (expected onlyPnet, onlyCnet or both)"
            ))),
        }
    }
}

/// Checkpoints to seed each sub-network from.
#[derive(Debug, Clone, Default)]
pub struct WarmStart {
    pub pnet: Option<PathBuf>,
    pub cnet: Option<PathBuf>,
}

/// Result of preparing the parameter store for a run.
#[derive(Debug, Default)]
pub struct PreparedRun {
    pub frozen_proposal: Option<FrozenProposal>,
    /// History adopted from the classification checkpoint.
    pub stats: Option<TrainingStats>,
}

#[derive(Debug, Clone, Copy)]
pub struct TrainingModeController {
    mode: TrainingMode,
}

impl TrainingModeController {
    pub fn new(mode: TrainingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TrainingMode {
        self.mode
    }

    /// Load warm-start weights into `store`.
    ///
    /// Order matters: proposal weights are loaded first, the frozen proposal
    /// copy (onlyCnet) is taken next, and only then are classification
    /// weights replaced.
    pub fn prepare(
        &self,
        store: &mut ParameterStore,
        warm: &WarmStart,
    ) -> Result<PreparedRun, TrainError> {
        if let Some(checkpoint) = Checkpoint::load_optional(warm.pnet.as_deref())? {
            let (source, _) = checkpoint.into_store()?;
            store.copy_from(SubNetwork::Proposal, &source)?;
            tracing::info!(path = ?warm.pnet, "Proposal network warm-started");
        }

        let frozen_proposal = self
            .mode
            .needs_frozen_proposal()
            .then(|| store.freeze_proposal());

        let mut stats = None;
        if let Some(checkpoint) = Checkpoint::load_optional(warm.cnet.as_deref())? {
            let (source, loaded_stats) = checkpoint.into_store()?;
            store.copy_from(SubNetwork::Classification, &source)?;
            stats = loaded_stats;
            tracing::info!(
                path = ?warm.cnet,
                history = stats.as_ref().map_or(0, TrainingStats::len),
                "Classification network warm-started"
            );
        }

        Ok(PreparedRun {
            frozen_proposal,
            stats,
        })
    }
}
