use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Smooth a master light with a separable Gaussian of the given sigma.
///
/// Edges are clamped. A sigma of zero (or less) returns the input unchanged.
pub fn gaussian_blur_array(data: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 || data.is_empty() {
        return data.clone();
    }
    let kernel = make_gaussian_kernel(sigma);
    let along_rows = convolve_axis(data, &kernel, Axis(1));
    convolve_axis(&along_rows, &kernel, Axis(0))
}

fn make_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// 1-D convolution along `axis` (1 = within rows, 0 = within columns).
fn convolve_axis(data: &Array2<f32>, kernel: &[f32], axis: Axis) -> Array2<f32> {
    let (h, w) = data.dim();
    let radius = kernel.len() as isize / 2;
    let len = (if axis == Axis(1) { w } else { h }) as isize;

    let sample = |row: usize, col: usize| -> f32 {
        kernel
            .iter()
            .enumerate()
            .map(|(ki, &kv)| {
                let offset = ki as isize - radius;
                let v = if axis == Axis(1) {
                    data[[row, (col as isize + offset).clamp(0, len - 1) as usize]]
                } else {
                    data[[(row as isize + offset).clamp(0, len - 1) as usize, col]]
                };
                v * kv
            })
            .sum()
    };

    let mut result = Array2::<f32>::zeros((h, w));
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut out)| {
                for col in 0..w {
                    out[col] = sample(row, col);
                }
            });
    } else {
        for ((row, col), out) in result.indexed_iter_mut() {
            *out = sample(row, col);
        }
    }
    result
}
