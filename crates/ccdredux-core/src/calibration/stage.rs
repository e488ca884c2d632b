use tracing::{info, warn};

use crate::error::ReduxError;
use crate::frame::GroupKey;

/// Progress of one `(filter, gain, intTime)` light group through calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupStage {
    Unstarted,
    FlatsResolved,
    DarksForFlatsApplied,
    FlatMasterReady,
    DarksForLightResolved,
    LightMasterReady,
    Done,
    Failed,
}

impl std::fmt::Display for GroupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstarted => write!(f, "Unstarted"),
            Self::FlatsResolved => write!(f, "Flats resolved"),
            Self::DarksForFlatsApplied => write!(f, "Darks for flats applied"),
            Self::FlatMasterReady => write!(f, "Flat master ready"),
            Self::DarksForLightResolved => write!(f, "Darks for light resolved"),
            Self::LightMasterReady => write!(f, "Light master ready"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A light group that could not be reduced.
#[derive(Debug)]
pub struct GroupFailure {
    pub key: GroupKey,
    /// Last stage reached before the failure.
    pub stage: GroupStage,
    pub error: ReduxError,
}

impl std::fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed after '{}': {}", self.key, self.stage, self.error)
    }
}

/// Forward-only stage tracker that logs every transition.
#[derive(Debug)]
pub struct StageTracker {
    key: GroupKey,
    stage: GroupStage,
}

impl StageTracker {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            stage: GroupStage::Unstarted,
        }
    }

    pub fn stage(&self) -> GroupStage {
        self.stage
    }

    /// Move to `next`. Skipped stages (e.g. flats disabled) are allowed;
    /// moving backwards or out of `Failed` is ignored.
    pub fn advance(&mut self, next: GroupStage) {
        if self.stage == GroupStage::Failed || next <= self.stage {
            return;
        }
        info!(group = %self.key, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }

    /// Terminate the group, recording the stage at which it failed.
    pub fn fail(&mut self, error: ReduxError) -> GroupFailure {
        let stage = self.stage;
        warn!(group = %self.key, stage = %stage, error = %error, "Group failed");
        self.stage = GroupStage::Failed;
        GroupFailure {
            key: self.key,
            stage,
            error,
        }
    }
}
