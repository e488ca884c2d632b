use ndarray::{s, Array2, ArrayView2};
use serde::Serialize;
use tracing::{debug, warn};

use crate::detection::SourceCandidate;
use crate::error::{ReduxError, Result};
use crate::frame::Frame;
use crate::pipeline::config::PhotometryConfig;

use super::aperture::{measure_aperture, ApertureMask, ApertureMeasurement};
use super::gaussian_fit::{fit_gaussian_1d, FitBounds, FitResult, GaussianParams};
use super::profile::radial_profile;

/// Photometry of one source on a calibrated master light.
#[derive(Clone, Debug)]
pub struct SourceMeasurement {
    pub id: usize,
    /// Centroid (row, col) in master-light pixels.
    pub centroid: (f64, f64),
    /// Unsmoothed `2L x 2L` cut-out the aperture was summed over.
    pub sub_frame: Array2<f32>,
    /// Mean value per integer radius `0..L` (smoothed data).
    pub radial_profile: Vec<Option<f64>>,
    pub fit: GaussianParams,
    pub r_squared: f64,
    pub iterations: usize,
    pub aperture: ApertureMeasurement,
}

/// A source that could not be measured.
#[derive(Clone, Debug, Serialize)]
pub struct SkippedSource {
    pub id: usize,
    pub centroid: (f64, f64),
    pub reason: String,
}

/// Every source of one master light, measured or skipped.
#[derive(Clone, Debug, Default)]
pub struct SourceTable {
    pub measured: Vec<SourceMeasurement>,
    pub skipped: Vec<SkippedSource>,
}

/// Top-left corner of the `2L` cut-out around a centroid, truncating the
/// fractional part. Fails when the cut-out leaves a `h x w` image.
pub fn subframe_origin(
    centroid: (f64, f64),
    half_width: usize,
    shape: (usize, usize),
) -> Result<(usize, usize)> {
    let (row, col) = centroid;
    let out = || ReduxError::SubFrameOutOfBounds {
        row,
        col,
        half_width,
    };
    let l = half_width as f64;
    let (r0, c0) = ((row - l).floor(), (col - l).floor());
    if !(r0 >= 0.0 && c0 >= 0.0) {
        return Err(out());
    }
    let (r0, c0) = (r0 as usize, c0 as usize);
    if r0 + 2 * half_width > shape.0 || c0 + 2 * half_width > shape.1 {
        return Err(out());
    }
    Ok((r0, c0))
}

/// Measure every candidate.
///
/// `profile_data` is the (optionally smoothed) image the radial profile is
/// taken from; aperture sums always use `master`'s own pixels and bad map.
/// Failures are recorded per source and never abort the table.
pub fn measure_sources(
    master: &Frame,
    profile_data: &Array2<f32>,
    candidates: &[SourceCandidate],
    config: &PhotometryConfig,
) -> SourceTable {
    let aperture = ApertureMask::new(config.half_width, config.aperture_radius);
    let bounds = if config.bounded_fit {
        FitBounds::non_negative()
    } else {
        FitBounds::unbounded()
    };
    let stats = master.stats();
    let initial = GaussianParams::new(
        config.half_width as f64,
        config.initial_sigma,
        stats.max,
        stats.mean,
    );

    let mut table = SourceTable::default();
    for (id, candidate) in candidates.iter().enumerate() {
        match measure_one(master, profile_data, candidate, &aperture, initial, bounds, config) {
            Ok((sub_frame, radial_profile, fit, aperture)) => {
                debug!(
                    id,
                    row = candidate.centroid.0,
                    col = candidate.centroid.1,
                    sigma = fit.params.sigma,
                    background = fit.params.background,
                    r_squared = fit.r_squared,
                    magnitude = aperture.instrumental_magnitude,
                    "Source measured"
                );
                table.measured.push(SourceMeasurement {
                    id,
                    centroid: candidate.centroid,
                    sub_frame,
                    radial_profile,
                    fit: fit.params,
                    r_squared: fit.r_squared,
                    iterations: fit.iterations,
                    aperture,
                });
            }
            Err(e) => {
                warn!(
                    id,
                    row = candidate.centroid.0,
                    col = candidate.centroid.1,
                    error = %e,
                    "Skipping source"
                );
                table.skipped.push(SkippedSource {
                    id,
                    centroid: candidate.centroid,
                    reason: e.to_string(),
                });
            }
        }
    }
    table
}

type Measured = (Array2<f32>, Vec<Option<f64>>, FitResult, ApertureMeasurement);

fn measure_one(
    master: &Frame,
    profile_data: &Array2<f32>,
    candidate: &SourceCandidate,
    aperture: &ApertureMask,
    initial: GaussianParams,
    bounds: FitBounds,
    config: &PhotometryConfig,
) -> Result<Measured> {
    let l = config.half_width;
    let (r0, c0) = subframe_origin(candidate.centroid, l, master.shape())?;
    let window = s![r0..r0 + 2 * l, c0..c0 + 2 * l];

    let good: Option<ArrayView2<bool>> = master.bad_map().map(|m| m.slice(window));
    let profile = radial_profile(&profile_data.slice(window), good.as_ref(), l);
    let (x, y) = profile.reflect().defined_points();
    let fit = fit_gaussian_1d(&x, &y, initial, bounds, config.max_iterations)?;

    let sub = master.data().slice(window);
    let measurement = measure_aperture(
        &sub,
        good.as_ref(),
        aperture,
        fit.params.background,
        master.int_time(),
    )?;
    Ok((sub.to_owned(), profile.values, fit, measurement))
}
