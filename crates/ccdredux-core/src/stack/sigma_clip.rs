//! Sigma-clipped accumulation of calibration and science frames.
//!
//! Two clipping geometries are supported:
//!
//! * **Per-frame** (`Dark`, `Flat`): each frame is tested against its own
//!   global mean and standard deviation. The resulting per-frame good masks
//!   are AND-ed into the group mask.
//! * **Per-pixel** (`Light`): at every location the N samples across frames
//!   are tested against each other. A location is good only if none of its
//!   samples was rejected. The default test uses the location's median and
//!   a spread that never drops below the noise of the whole stack, so small
//!   stacks of noisy frames keep false rejections near the nominal rate.
//!
//! In both cases the master is the per-pixel median. By default the median
//! is taken over raw values and the masks are only reported
//! ([`CombinePolicy::Raw`]).

use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CLIP_SIGMA, MAD_TO_SIGMA, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{ReduxError, Result};

use super::median::{check_shapes, compute_median, median_combine};

/// Which clipping geometry to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipKind {
    Dark,
    Flat,
    Light,
}

impl std::fmt::Display for ClipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
            Self::Light => write!(f, "light"),
        }
    }
}

/// Whether rejected samples take part in the median combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombinePolicy {
    /// Median of every raw sample; masks are reported only.
    #[default]
    Raw,
    /// Median of the samples that survived clipping. A location where every
    /// sample was rejected falls back to the raw median.
    ExcludeRejected,
}

/// Centre and spread used to test one sample in per-pixel clipping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipStatistic {
    /// Each sample is tested against the median of its location. The spread
    /// is the larger of the location's MAD-based sigma and the stack-wide
    /// [`NoiseFloor`] at that level.
    #[default]
    Robust,
    /// Each sample is tested against the mean/std of the other N-1 samples.
    /// With few frames the other samples rarely describe the noise, and most
    /// locations of a noisy stack are flagged.
    LeaveOneOut,
    /// Each sample is tested against the mean/std of all N samples, itself
    /// included. A single outlier among N samples can then never exceed
    /// (N-1)/sqrt(N) standard deviations.
    FullSample,
}

/// Parameters for sigma-clipped accumulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Clip width `k`: values beyond mean +/- k*std are rejected (default: 3).
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    #[serde(default)]
    pub combine: CombinePolicy,
    #[serde(default)]
    pub statistic: ClipStatistic,
    /// Reject per-pixel samples whose raw value is exactly zero.
    #[serde(default = "default_true")]
    pub reject_zero: bool,
    /// Reject every sample at a location whose values are all identical.
    #[serde(default)]
    pub reject_static: bool,
}

fn default_sigma() -> f64 {
    DEFAULT_CLIP_SIGMA
}

fn default_true() -> bool {
    true
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_CLIP_SIGMA,
            combine: CombinePolicy::default(),
            statistic: ClipStatistic::default(),
            reject_zero: true,
            reject_static: false,
        }
    }
}

/// Typical noise of a per-pixel stack.
///
/// `sigma` is the per-location scatter of a typical location and `level` its
/// typical median. Locations brighter than `level` get a shot-noise scaled
/// floor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseFloor {
    pub sigma: f64,
    pub level: f64,
}

impl NoiseFloor {
    /// Estimate from the medians, across locations, of the unbiased sample
    /// variance and of the sample median.
    ///
    /// Fewer than two planes give a zero floor.
    pub fn estimate(planes: &[ArrayView2<f32>]) -> Result<Self> {
        let n = planes.len();
        if n < 2 {
            return Ok(Self::default());
        }
        let (h, w) = check_shapes(planes)?;

        let row_stats = |row: usize| -> Vec<(f64, f64)> {
            let mut samples = vec![0.0f32; n];
            (0..w)
                .map(|col| {
                    for (i, plane) in planes.iter().enumerate() {
                        samples[i] = plane[[row, col]];
                    }
                    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
                    let var = samples
                        .iter()
                        .map(|&v| {
                            let d = v as f64 - mean;
                            d * d
                        })
                        .sum::<f64>()
                        / (n - 1) as f64;
                    let level = compute_median(&mut samples, n) as f64;
                    (var, level)
                })
                .collect()
        };

        let stats: Vec<(f64, f64)> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
            (0..h).into_par_iter().flat_map_iter(row_stats).collect()
        } else {
            (0..h).flat_map(row_stats).collect()
        };

        let mut variances: Vec<f64> = stats.iter().map(|&(var, _)| var).collect();
        let mut levels: Vec<f64> = stats.iter().map(|&(_, level)| level).collect();
        // Wilson-Hilferty approximation of the median of chi-square(nu) / nu.
        let nu = (n - 1) as f64;
        let chi2_median = (1.0 - 2.0 / (9.0 * nu)).powi(3);
        Ok(Self {
            sigma: (median_f64(&mut variances) / chi2_median).sqrt(),
            level: median_f64(&mut levels),
        })
    }

    /// Floor on the spread of a location whose median is `level`.
    pub fn at(&self, level: f64) -> f64 {
        if self.level > 0.0 && level > self.level {
            self.sigma * (level / self.level).sqrt()
        } else {
            self.sigma
        }
    }
}

fn median_f64(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mid = n / 2;
    let (below, middle, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let middle = *middle;
    if n % 2 == 1 {
        middle
    } else {
        let lower = below.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower + middle) / 2.0
    }
}

/// Master array and good-pixel mask produced by one accumulation.
#[derive(Clone, Debug, PartialEq)]
pub struct Accumulation {
    pub master: Array2<f32>,
    /// `true` where the pixel is usable.
    pub good_mask: Array2<bool>,
}

impl Accumulation {
    pub fn bad_pixels(&self) -> usize {
        self.good_mask.iter().filter(|&&ok| !ok).count()
    }
}

/// Reduce same-shape planes to a master plus good-pixel mask.
///
/// Fails with [`ReduxError::EmptyAccumulation`] for no planes and
/// [`ReduxError::ShapeMismatch`] before any arithmetic when shapes differ.
pub fn accumulate(
    planes: &[ArrayView2<f32>],
    kind: ClipKind,
    params: &SigmaClipParams,
) -> Result<Accumulation> {
    if planes.is_empty() {
        return Err(ReduxError::EmptyAccumulation);
    }
    let shape = check_shapes(planes)?;

    if planes.len() == 1 {
        // No basis for rejecting anything with one sample.
        return Ok(Accumulation {
            master: planes[0].to_owned(),
            good_mask: Array2::from_elem(shape, true),
        });
    }

    match kind {
        ClipKind::Dark | ClipKind::Flat => accumulate_per_frame(planes, shape, params),
        ClipKind::Light => accumulate_per_pixel(planes, shape, params),
    }
}

/// Good-pixel mask of one frame against its own global mean and std.
///
/// Pixels strictly outside `[mean - k*std, mean + k*std]` are `false`. A frame
/// with zero variance flags nothing.
pub fn per_frame_mask(plane: &ArrayView2<f32>, k: f64) -> Array2<bool> {
    let (mean, std) = crate::stats::mean_stddev(plane);
    let lo = mean - k * std;
    let hi = mean + k * std;
    plane.mapv(|v| {
        let v = v as f64;
        v >= lo && v <= hi
    })
}

fn accumulate_per_frame(
    planes: &[ArrayView2<f32>],
    shape: (usize, usize),
    params: &SigmaClipParams,
) -> Result<Accumulation> {
    let masks: Vec<Array2<bool>> = if planes.len() >= 4 {
        planes
            .par_iter()
            .map(|p| per_frame_mask(p, params.sigma))
            .collect()
    } else {
        planes.iter().map(|p| per_frame_mask(p, params.sigma)).collect()
    };

    let mut good_mask = Array2::from_elem(shape, true);
    for mask in &masks {
        Zip::from(&mut good_mask)
            .and(mask)
            .for_each(|g, &m| *g = *g && m);
    }

    let master = match params.combine {
        CombinePolicy::Raw => median_combine(planes, None)?,
        CombinePolicy::ExcludeRejected => median_combine(planes, Some(&masks))?,
    };

    Ok(Accumulation { master, good_mask })
}

fn accumulate_per_pixel(
    planes: &[ArrayView2<f32>],
    shape: (usize, usize),
    params: &SigmaClipParams,
) -> Result<Accumulation> {
    let (h, w) = shape;
    let n = planes.len();
    let floor = match params.statistic {
        ClipStatistic::Robust => NoiseFloor::estimate(planes)?,
        ClipStatistic::LeaveOneOut | ClipStatistic::FullSample => NoiseFloor::default(),
    };

    let process_row = |row: usize| -> (Vec<f32>, Vec<bool>) {
        let mut samples = vec![0.0f32; n];
        let mut scratch = vec![0.0f32; n];
        let mut work = Vec::with_capacity(n);
        let mut rejected = vec![false; n];
        let mut masters = vec![0.0f32; w];
        let mut goods = vec![true; w];

        for col in 0..w {
            for (i, plane) in planes.iter().enumerate() {
                samples[i] = plane[[row, col]];
            }
            reject_samples(&samples, params, floor, &mut work, &mut rejected);
            goods[col] = !rejected.iter().any(|&r| r);

            let kept = match params.combine {
                CombinePolicy::Raw => 0,
                CombinePolicy::ExcludeRejected => {
                    let mut kept = 0;
                    for (i, &v) in samples.iter().enumerate() {
                        if !rejected[i] {
                            scratch[kept] = v;
                            kept += 1;
                        }
                    }
                    kept
                }
            };
            masters[col] = if kept > 0 {
                compute_median(&mut scratch[..kept], kept)
            } else {
                scratch.copy_from_slice(&samples);
                compute_median(&mut scratch, n)
            };
        }
        (masters, goods)
    };

    let rows: Vec<(Vec<f32>, Vec<bool>)> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h).into_par_iter().map(process_row).collect()
    } else {
        (0..h).map(process_row).collect()
    };

    let mut master = Array2::<f32>::zeros(shape);
    let mut good_mask = Array2::from_elem(shape, true);
    for (row, (m_row, g_row)) in rows.into_iter().enumerate() {
        for col in 0..w {
            master[[row, col]] = m_row[col];
            good_mask[[row, col]] = g_row[col];
        }
    }

    Ok(Accumulation { master, good_mask })
}

/// Flag the samples at one location. `rejected[i]` is set for sample `i`.
///
/// `work` is scratch space for the robust statistic.
pub(crate) fn reject_samples(
    samples: &[f32],
    params: &SigmaClipParams,
    floor: NoiseFloor,
    work: &mut Vec<f32>,
    rejected: &mut [bool],
) {
    let n = samples.len();
    rejected.iter_mut().for_each(|r| *r = false);
    if n < 2 {
        return;
    }

    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    // Deviations from the sample mean keep the leave-one-out sums well
    // conditioned for 16-bit magnitudes.
    let mut dev_sq_sum = 0.0f64;
    for &v in samples {
        let d = v as f64 - mean;
        dev_sq_sum += d * d;
    }
    let tol = 1e-9 * (1.0 + mean.abs());
    let full_std = (dev_sq_sum / n as f64).sqrt();

    if params.reject_static && full_std <= tol {
        rejected.iter_mut().for_each(|r| *r = true);
        return;
    }

    let (median, robust_spread) = match params.statistic {
        ClipStatistic::Robust => {
            work.clear();
            work.extend_from_slice(samples);
            let median = compute_median(work, n) as f64;
            work.clear();
            work.extend(samples.iter().map(|&v| (v as f64 - median).abs() as f32));
            let mad = compute_median(work, n) as f64 * MAD_TO_SIGMA;
            (median, mad.max(floor.at(median)))
        }
        ClipStatistic::LeaveOneOut | ClipStatistic::FullSample => (mean, 0.0),
    };

    let m = (n - 1) as f64;
    for (i, &v) in samples.iter().enumerate() {
        if params.reject_zero && v == 0.0 {
            rejected[i] = true;
            continue;
        }
        let d = v as f64 - mean;
        let (centre, std) = match params.statistic {
            ClipStatistic::Robust => (median - mean, robust_spread),
            ClipStatistic::FullSample => (0.0, full_std),
            ClipStatistic::LeaveOneOut => {
                // The deviations sum to zero, so the others sum to -d.
                let centre = -d / m;
                let var = ((dev_sq_sum - d * d) / m - centre * centre).max(0.0);
                (centre, var.sqrt())
            }
        };
        let offset = (d - centre).abs();
        rejected[i] = if std <= tol {
            offset > tol
        } else {
            offset > params.sigma * std
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(samples: &[f32], params: &SigmaClipParams, floor: NoiseFloor) -> Vec<bool> {
        let mut rejected = vec![false; samples.len()];
        reject_samples(samples, params, floor, &mut Vec::new(), &mut rejected);
        rejected
    }

    #[test]
    fn robust_flags_single_outlier() {
        let samples = [100.0f32, 100.0, 10000.0, 100.0, 100.0];
        let rejected = flag(&samples, &SigmaClipParams::default(), NoiseFloor::default());
        assert_eq!(rejected, [false, false, true, false, false]);
    }

    #[test]
    fn robust_keeps_scatter_within_the_floor() {
        let floor = NoiseFloor {
            sigma: 10.0,
            level: 1000.0,
        };
        // Uneven spacing that leave-one-out would reject.
        let samples = [990.0f32, 1000.0, 1025.0];
        assert!(flag(&samples, &SigmaClipParams::default(), floor).iter().all(|&r| !r));

        let loo = SigmaClipParams {
            statistic: ClipStatistic::LeaveOneOut,
            ..Default::default()
        };
        assert!(flag(&samples, &loo, floor).iter().any(|&r| r));

        let hot = [990.0f32, 1000.0, 1400.0];
        assert_eq!(flag(&hot, &SigmaClipParams::default(), floor), [false, false, true]);
    }

    #[test]
    fn floor_scales_with_level() {
        let floor = NoiseFloor {
            sigma: 10.0,
            level: 1000.0,
        };
        assert_eq!(floor.at(500.0), 10.0);
        assert!((floor.at(4000.0) - 20.0).abs() < 1e-12);
        let no_level = NoiseFloor {
            sigma: 10.0,
            level: 0.0,
        };
        assert_eq!(no_level.at(4000.0), 10.0);
    }

    #[test]
    fn median_f64_handles_odd_even_and_empty() {
        assert_eq!(median_f64(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_f64(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median_f64(&mut []), 0.0);
    }

    #[test]
    fn leave_one_out_flags_single_outlier() {
        let samples = [100.0f32, 100.0, 10000.0, 100.0, 100.0];
        let params = SigmaClipParams {
            statistic: ClipStatistic::LeaveOneOut,
            ..Default::default()
        };
        let rejected = flag(&samples, &params, NoiseFloor::default());
        assert_eq!(rejected, [false, false, true, false, false]);
    }

    #[test]
    fn full_sample_cannot_flag_single_outlier_of_five() {
        let samples = [100.0f32, 100.0, 10000.0, 100.0, 100.0];
        let params = SigmaClipParams {
            statistic: ClipStatistic::FullSample,
            ..Default::default()
        };
        assert!(flag(&samples, &params, NoiseFloor::default()).iter().all(|&r| !r));
    }

    #[test]
    fn zero_samples_are_rejected() {
        let samples = [100.0f32, 0.0, 101.0, 99.0];
        let rejected = flag(&samples, &SigmaClipParams::default(), NoiseFloor::default());
        assert!(rejected[1]);
        assert!(!rejected[0] && !rejected[2] && !rejected[3]);
    }

    #[test]
    fn static_rejection_is_opt_in() {
        let samples = [42.0f32; 4];
        assert!(flag(&samples, &SigmaClipParams::default(), NoiseFloor::default())
            .iter()
            .all(|&r| !r));

        let params = SigmaClipParams {
            reject_static: true,
            ..Default::default()
        };
        assert!(flag(&samples, &params, NoiseFloor::default()).iter().all(|&r| r));
    }
}
