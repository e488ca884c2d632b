//! Azimuthally averaged radial profiles of square sub-frames.

use ndarray::ArrayView2;

/// Mean pixel value per integer radius around the sub-frame centre.
///
/// `values[r]` is `None` when no usable pixel has truncated distance `r`.
#[derive(Clone, Debug, PartialEq)]
pub struct RadialProfile {
    pub values: Vec<Option<f64>>,
}

/// Radial profile mirrored across zero, ready for a 1-D Gaussian fit.
#[derive(Clone, Debug, PartialEq)]
pub struct ReflectedProfile {
    /// Integer abscissas spanning `0..=2L`, one per sample.
    pub x: Vec<f64>,
    /// `[profile[L-1], .., profile[0], profile[0], .., profile[L-1]]`.
    pub y: Vec<Option<f64>>,
}

impl ReflectedProfile {
    /// The `(x, y)` pairs whose bin is defined.
    pub fn defined_points(&self) -> (Vec<f64>, Vec<f64>) {
        self.x
            .iter()
            .zip(&self.y)
            .filter_map(|(&x, y)| y.map(|y| (x, y)))
            .unzip()
    }
}

/// Bin every pixel of `sub` by its distance from `(centre, centre)`,
/// truncated toward zero, and average each bin. Only radii `0..half_width`
/// are kept. Pixels that are `false` in `good` are ignored.
pub fn radial_profile(
    sub: &ArrayView2<f32>,
    good: Option<&ArrayView2<bool>>,
    half_width: usize,
) -> RadialProfile {
    let centre = half_width as f64;
    let mut sums = vec![0.0f64; half_width];
    let mut counts = vec![0usize; half_width];

    for ((row, col), &v) in sub.indexed_iter() {
        if let Some(g) = good {
            if !g[[row, col]] {
                continue;
            }
        }
        let dr = row as f64 - centre;
        let dc = col as f64 - centre;
        let r = (dr * dr + dc * dc).sqrt() as usize;
        if r < half_width {
            sums[r] += v as f64;
            counts[r] += 1;
        }
    }

    RadialProfile {
        values: sums
            .into_iter()
            .zip(counts)
            .map(|(s, n)| (n > 0).then(|| s / n as f64))
            .collect(),
    }
}

impl RadialProfile {
    /// Mirror the profile to length `2L` against [`abscissas`].
    pub fn reflect(&self) -> ReflectedProfile {
        let half = self.values.len();
        let y: Vec<Option<f64>> = self
            .values
            .iter()
            .rev()
            .chain(self.values.iter())
            .copied()
            .collect();
        ReflectedProfile {
            x: abscissas(half),
            y,
        }
    }
}

/// `2L` abscissas evenly spaced over `[0, 2L]` (both ends included) and
/// truncated to integers.
pub fn abscissas(half_width: usize) -> Vec<f64> {
    let n = 2 * half_width;
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| ((i * n) as f64 / (n - 1) as f64).trunc())
            .collect(),
    }
}
