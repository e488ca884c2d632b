use ndarray::{Array2, ArrayView2};
use serde::Serialize;

use crate::error::{ReduxError, Result};

/// Circular aperture over a `2L x 2L` sub-frame, centred on `(L, L)`.
///
/// Built once per `(L, R)` and shared by every source measured with it. A
/// pixel belongs to the aperture when its distance from the centre is
/// strictly less than `R`.
#[derive(Clone, Debug)]
pub struct ApertureMask {
    half_width: usize,
    radius: usize,
    inside: Array2<bool>,
    n_pix: usize,
}

impl ApertureMask {
    pub fn new(half_width: usize, radius: usize) -> Self {
        let side = 2 * half_width;
        let centre = half_width as f64;
        let r = radius as f64;
        let inside = Array2::from_shape_fn((side, side), |(row, col)| {
            let dr = row as f64 - centre;
            let dc = col as f64 - centre;
            (dr * dr + dc * dc).sqrt() < r
        });
        let n_pix = inside.iter().filter(|&&v| v).count();
        Self {
            half_width,
            radius,
            inside,
            n_pix,
        }
    }

    pub fn half_width(&self) -> usize {
        self.half_width
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Number of pixels inside the aperture.
    pub fn n_pix(&self) -> usize {
        self.n_pix
    }

    pub fn inside(&self) -> &Array2<bool> {
        &self.inside
    }
}

/// Aperture sums and the derived instrumental magnitude of one source.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ApertureMeasurement {
    /// Background-subtracted counts over good aperture pixels.
    pub counts: f64,
    /// Same sum ignoring the bad-pixel map (QA only).
    pub counts_unmasked: f64,
    /// Aperture pixel count used for normalisation.
    pub n_pix: usize,
    /// Aperture pixels that were good.
    pub n_good: usize,
    /// `counts / n_pix / int_time`.
    pub count_flux: f64,
    /// `-2.5 * log10(count_flux)`.
    pub instrumental_magnitude: f64,
}

/// Sum background-subtracted counts inside `aperture`.
///
/// Residuals below the background clamp to zero. Pixels that are `false` in
/// `good` are left out of `counts` but included in `counts_unmasked`.
pub fn measure_aperture(
    sub: &ArrayView2<f32>,
    good: Option<&ArrayView2<bool>>,
    aperture: &ApertureMask,
    background: f64,
    int_time: f64,
) -> Result<ApertureMeasurement> {
    if sub.dim() != aperture.inside.dim() {
        return Err(ReduxError::ShapeMismatch {
            expected: aperture.inside.dim(),
            found: sub.dim(),
        });
    }
    if let Some(g) = good {
        if g.dim() != sub.dim() {
            return Err(ReduxError::ShapeMismatch {
                expected: sub.dim(),
                found: g.dim(),
            });
        }
    }
    if int_time.is_nan() || int_time <= 0.0 {
        return Err(ReduxError::InvalidExposureTime(int_time));
    }

    let mut counts = 0.0f64;
    let mut counts_unmasked = 0.0f64;
    let mut n_good = 0usize;
    for ((idx, &v), &inside) in sub.indexed_iter().zip(aperture.inside.iter()) {
        if !inside {
            continue;
        }
        let excess = (v as f64 - background).max(0.0);
        counts_unmasked += excess;
        if good.is_none_or(|g| g[idx]) {
            counts += excess;
            n_good += 1;
        }
    }

    if counts <= 0.0 {
        return Err(ReduxError::NonPositiveFlux { counts });
    }
    let n_pix = aperture.n_pix;
    let count_flux = counts / n_pix as f64 / int_time;
    Ok(ApertureMeasurement {
        counts,
        counts_unmasked,
        n_pix,
        n_good,
        count_flux,
        instrumental_magnitude: -2.5 * count_flux.log10(),
    })
}
