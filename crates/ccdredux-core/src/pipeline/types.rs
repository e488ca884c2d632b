use serde::Serialize;

use crate::calibration::{CalibratedLight, GroupFailure, MaskSummary};
use crate::frame::filter_label;
use crate::photometry::{ApertureMeasurement, GaussianParams, SkippedSource, SourceTable};
use crate::stats::FrameStats;

/// Reduction stage, used for progress reporting.
#[derive(Clone, Copy, Debug)]
pub enum ReductionStage {
    Calibrating,
    Measuring,
    Writing,
}

impl std::fmt::Display for ReductionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calibrating => write!(f, "Calibrating light groups"),
            Self::Measuring => write!(f, "Measuring sources"),
            Self::Writing => write!(f, "Writing output"),
        }
    }
}

/// Thread-safe progress reporting for a reduction.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items in
    /// this stage (e.g., light groups), if known.
    fn begin_stage(&self, _stage: ReductionStage, _total_items: Option<usize>) {}

    /// One work item within the current stage has completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// No-op progress reporter, used when `run_reduction` delegates.
pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// A calibrated light group and the photometry of its sources.
#[derive(Debug)]
pub struct GroupReduction<'a> {
    pub calibrated: CalibratedLight<'a>,
    pub sources: SourceTable,
}

/// Everything one run produced. Failed groups do not stop the others.
#[derive(Debug, Default)]
pub struct ReductionOutput<'a> {
    pub groups: Vec<GroupReduction<'a>>,
    pub failures: Vec<GroupFailure>,
}

impl ReductionOutput<'_> {
    pub fn report(&self) -> ReductionReport {
        ReductionReport {
            groups: self.groups.iter().map(GroupReport::from).collect(),
            failures: self
                .failures
                .iter()
                .map(|f| FailureReport {
                    group: f.key.to_string(),
                    stage: f.stage.to_string(),
                    class: format!("{:?}", f.error.class()),
                    error: f.error.to_string(),
                })
                .collect(),
        }
    }
}

/// Serializable summary of a run, written next to the master lights.
#[derive(Clone, Debug, Serialize)]
pub struct ReductionReport {
    pub groups: Vec<GroupReport>,
    pub failures: Vec<FailureReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupReport {
    pub filter: String,
    pub gain: u32,
    pub int_time: f64,
    pub light_frames: usize,
    pub degraded: bool,
    pub dark_corrected: bool,
    pub flat_corrected: bool,
    pub master: FrameStats,
    pub bad_pixels: MaskSummary,
    pub sources: Vec<SourceReport>,
    pub skipped: Vec<SkippedSource>,
}

impl From<&GroupReduction<'_>> for GroupReport {
    fn from(g: &GroupReduction<'_>) -> Self {
        let c = &g.calibrated;
        Self {
            filter: filter_label(c.key.filter),
            gain: c.key.gain,
            int_time: c.key.int_time.seconds(),
            light_frames: c.light_frames,
            degraded: c.degraded,
            dark_corrected: c.master.dark_corrected(),
            flat_corrected: c.master.flat_corrected(),
            master: *c.master.stats(),
            bad_pixels: c.masks.clone(),
            sources: g
                .sources
                .measured
                .iter()
                .map(|m| SourceReport {
                    id: m.id,
                    centroid: m.centroid,
                    fit: m.fit,
                    r_squared: m.r_squared,
                    iterations: m.iterations,
                    photometry: m.aperture,
                    // TOML has no null; undefined bins are written as NaN.
                    radial_profile: m
                        .radial_profile
                        .iter()
                        .map(|v| v.unwrap_or(f64::NAN))
                        .collect(),
                })
                .collect(),
            skipped: g.sources.skipped.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceReport {
    pub id: usize,
    pub centroid: (f64, f64),
    pub fit: GaussianParams,
    pub r_squared: f64,
    pub iterations: usize,
    pub photometry: ApertureMeasurement,
    pub radial_profile: Vec<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FailureReport {
    pub group: String,
    pub stage: String,
    pub class: String,
    pub error: String,
}
