//! Radial-profile fitting and aperture photometry of detected sources.

pub mod aperture;
pub mod extract;
pub mod gaussian_fit;
pub mod profile;

pub use aperture::{measure_aperture, ApertureMask, ApertureMeasurement};
pub use extract::{measure_sources, subframe_origin, SkippedSource, SourceMeasurement, SourceTable};
pub use gaussian_fit::{
    fit_gaussian_1d, gaussian_1d, r_squared, FitBounds, FitResult, GaussianParams,
};
pub use profile::{abscissas, radial_profile, RadialProfile, ReflectedProfile};
