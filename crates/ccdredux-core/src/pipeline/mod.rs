pub mod config;
mod orchestrator;
mod types;

pub use orchestrator::{run_reduction, run_reduction_reported};
pub use types::{
    FailureReport, GroupReduction, GroupReport, ProgressReporter, ReductionOutput,
    ReductionReport, ReductionStage, SourceReport,
};
