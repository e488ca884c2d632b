//! Descriptive statistics over the valid pixels of a frame.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{ReduxError, Result};
use crate::stack::median::compute_median;

/// Summary statistics of a 2-D array. `std` is the population deviation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Half-open window `[low, high)` of pixel values considered valid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidWindow {
    pub low: f32,
    pub high: f32,
}

impl ValidWindow {
    pub fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    /// The default window: non-negative and below the saturation threshold.
    pub fn unsaturated(saturation: f32) -> Self {
        Self {
            low: 0.0,
            high: saturation,
        }
    }

    pub fn contains(&self, v: f32) -> bool {
        v >= self.low && v < self.high
    }
}

/// Compute statistics over `data`.
///
/// With a mask, only entries where the mask is `true` contribute. Without
/// one, only entries inside `window` contribute. Fails with
/// [`ReduxError::EmptyStatistics`] when nothing is left.
pub fn compute_stats(
    data: &ArrayView2<f32>,
    mask: Option<&ArrayView2<bool>>,
    window: ValidWindow,
) -> Result<FrameStats> {
    if let Some(m) = mask {
        if m.dim() != data.dim() {
            return Err(ReduxError::ShapeMismatch {
                expected: data.dim(),
                found: m.dim(),
            });
        }
    }

    let mut values: Vec<f32> = match mask {
        Some(m) => data
            .iter()
            .zip(m.iter())
            .filter(|(_, &ok)| ok)
            .map(|(&v, _)| v)
            .collect(),
        None => data.iter().copied().filter(|&v| window.contains(v)).collect(),
    };

    stats_of_values(&mut values)
}

/// Statistics of a plain sample. Reorders `values` in place.
pub(crate) fn stats_of_values(values: &mut [f32]) -> Result<FrameStats> {
    if values.is_empty() {
        return Err(ReduxError::EmptyStatistics);
    }

    let n = values.len() as f64;
    let mut sum = 0.0f64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values.iter() {
        let v = v as f64;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    let mean = sum / n;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    let len = values.len();
    let median = compute_median(values, len) as f64;

    Ok(FrameStats {
        mean,
        median,
        std: var.sqrt(),
        min,
        max,
    })
}

/// Global mean and population standard deviation of every pixel.
pub fn mean_stddev(data: &ArrayView2<f32>) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Number of `false` entries in a good-pixel mask.
pub fn count_bad(mask: &Array2<bool>) -> usize {
    mask.iter().filter(|&&ok| !ok).count()
}

/// True when any element is NaN.
pub fn contains_nan(data: &Array2<f32>) -> bool {
    data.iter().any(|v| v.is_nan())
}
