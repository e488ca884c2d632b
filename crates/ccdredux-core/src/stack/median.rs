use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{ReduxError, Result};

/// Combine arrays by taking the median at each pixel position.
///
/// Even sample counts average the two middle values. When `masks` is given,
/// samples whose mask entry is `false` are left out; a location where every
/// sample is masked falls back to the median of all samples.
///
/// Uses `select_nth_unstable` for O(n) median without full sort.
/// Parallelizes at the row level for images >= 256x256.
pub fn median_combine(
    planes: &[ArrayView2<f32>],
    masks: Option<&[Array2<bool>]>,
) -> Result<Array2<f32>> {
    if planes.is_empty() {
        return Err(ReduxError::EmptyAccumulation);
    }
    let (h, w) = check_shapes(planes)?;
    if let Some(masks) = masks {
        for m in masks {
            if m.dim() != (h, w) {
                return Err(ReduxError::ShapeMismatch {
                    expected: (h, w),
                    found: m.dim(),
                });
            }
        }
    }

    let n = planes.len();
    let median_row = |row: usize| -> Vec<f32> {
        let mut pixel_values = vec![0.0f32; n];
        let mut row_result = vec![0.0f32; w];
        for (col, result) in row_result.iter_mut().enumerate() {
            let kept = match masks {
                Some(masks) => {
                    let mut kept = 0;
                    for (plane, mask) in planes.iter().zip(masks) {
                        if mask[[row, col]] {
                            pixel_values[kept] = plane[[row, col]];
                            kept += 1;
                        }
                    }
                    kept
                }
                None => 0,
            };
            if kept > 0 {
                *result = compute_median(&mut pixel_values[..kept], kept);
            } else {
                for (i, plane) in planes.iter().enumerate() {
                    pixel_values[i] = plane[[row, col]];
                }
                *result = compute_median(&mut pixel_values, n);
            }
        }
        row_result
    };

    let mut result = Array2::<f32>::zeros((h, w));
    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        let rows: Vec<Vec<f32>> = (0..h).into_par_iter().map(median_row).collect();
        for (row, row_data) in rows.into_iter().enumerate() {
            for (col, val) in row_data.into_iter().enumerate() {
                result[[row, col]] = val;
            }
        }
    } else {
        for row in 0..h {
            for (col, val) in median_row(row).into_iter().enumerate() {
                result[[row, col]] = val;
            }
        }
    }
    Ok(result)
}

/// Verify every plane has the shape of the first; return that shape.
pub(crate) fn check_shapes(planes: &[ArrayView2<f32>]) -> Result<(usize, usize)> {
    let expected = planes
        .first()
        .map(|p| p.dim())
        .ok_or(ReduxError::EmptyAccumulation)?;
    for plane in &planes[1..] {
        if plane.dim() != expected {
            return Err(ReduxError::ShapeMismatch {
                expected,
                found: plane.dim(),
            });
        }
    }
    Ok(expected)
}

/// Median of the first `n` values, reordering them in place.
pub(crate) fn compute_median(pixel_values: &mut [f32], n: usize) -> f32 {
    if n == 1 {
        pixel_values[0]
    } else if n % 2 == 1 {
        let mid = n / 2;
        *pixel_values[..n]
            .select_nth_unstable_by(mid, |a, b| a.total_cmp(b))
            .1
    } else {
        let mid = n / 2;
        pixel_values[..n].select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        pixel_values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        ((pixel_values[mid - 1] as f64 + pixel_values[mid] as f64) / 2.0) as f32
    }
}
