use thiserror::Error;

use crate::frame::FrameKind;

/// The level of the calibration index at which a lookup missed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexLevel {
    Kind,
    Filter,
    Gain,
    IntTime,
}

impl std::fmt::Display for IndexLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kind => write!(f, "frame type"),
            Self::Filter => write!(f, "filter"),
            Self::Gain => write!(f, "gain"),
            Self::IntTime => write!(f, "integration time"),
        }
    }
}

/// Broad class of a failure, used by drivers to decide its blast radius.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Programmer or data errors; fatal to the operation that raised them.
    Structural,
    /// A calibration dependency is absent from the index.
    MissingDependency,
    /// Numerical breakdown (NaN masters, bad flux, failed fits).
    Numerical,
    /// Files, images, manifests and configuration.
    Environment,
}

#[derive(Error, Debug)]
pub enum ReduxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Frame does not belong to this group; mismatched: {}", .fields.join(", "))]
    GroupMismatch { fields: Vec<&'static str> },

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Cannot accumulate an empty frame sequence")]
    EmptyAccumulation,

    #[error("No valid pixels to compute statistics over")]
    EmptyStatistics,

    #[error("Master frame already set for this group")]
    MasterAlreadySet,

    #[error("Calibration index has no {kind} frames matching the requested {level}")]
    IndexMiss { kind: FrameKind, level: IndexLevel },

    #[error("{}", dark_miss(.gain, .int_time, .level))]
    NoDarkForGainTime {
        gain: u32,
        int_time: f64,
        level: IndexLevel,
    },

    #[error("{}", flat_miss(.filter, .gain, .level))]
    NoFlatForFilterGain {
        filter: String,
        gain: u32,
        level: IndexLevel,
    },

    #[error("NaN found in {stage} master")]
    NaNInMaster { stage: String },

    #[error("Non-positive aperture flux: {counts}")]
    NonPositiveFlux { counts: f64 },

    #[error("Gaussian fit did not converge after {iterations} iterations")]
    FitDidNotConverge { iterations: usize },

    #[error("Radial profile has only {points} usable points")]
    DegenerateProfile { points: usize },

    #[error("Sub-frame at ({row:.1}, {col:.1}) with half-width {half_width} leaves the image")]
    SubFrameOutOfBounds {
        row: f64,
        col: f64,
        half_width: usize,
    },

    #[error("Invalid integration time: {0}s")]
    InvalidExposureTime(f64),
}

fn dark_miss(gain: &u32, int_time: &f64, level: &IndexLevel) -> String {
    match level {
        IndexLevel::Kind => "No dark frames in the calibration index".to_string(),
        _ => format!("No dark frames for gain {gain} and integration time {int_time}s (missing {level})"),
    }
}

fn flat_miss(filter: &str, gain: &u32, level: &IndexLevel) -> String {
    match level {
        IndexLevel::Kind => "No flat frames in the calibration index".to_string(),
        _ => format!("No flat frames for filter {filter} and gain {gain} (missing {level})"),
    }
}

impl ReduxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::GroupMismatch { .. }
            | Self::ShapeMismatch { .. }
            | Self::EmptyAccumulation
            | Self::EmptyStatistics
            | Self::MasterAlreadySet
            | Self::SubFrameOutOfBounds { .. } => ErrorClass::Structural,
            Self::IndexMiss { .. }
            | Self::NoDarkForGainTime { .. }
            | Self::NoFlatForFilterGain { .. } => ErrorClass::MissingDependency,
            Self::NaNInMaster { .. }
            | Self::NonPositiveFlux { .. }
            | Self::FitDidNotConverge { .. }
            | Self::DegenerateProfile { .. }
            | Self::InvalidExposureTime(_) => ErrorClass::Numerical,
            Self::Io(_) | Self::Image(_) | Self::Manifest(_) | Self::InvalidConfig(_) => {
                ErrorClass::Environment
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ReduxError>;
