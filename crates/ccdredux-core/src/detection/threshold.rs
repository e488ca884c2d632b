use ndarray::Array2;

use crate::error::Result;
use crate::stats::{compute_stats, ValidWindow};

/// Background level and detection threshold of a master light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Threshold {
    /// Median of the usable pixels.
    pub background: f32,
    pub std: f32,
    /// `background + sigma * std`.
    pub level: f32,
}

/// Threshold at `median + sigma * std`, computed over pixels that are good in
/// `good_mask` (when given) and inside `window`.
pub fn median_sigma_threshold(
    data: &Array2<f32>,
    good_mask: Option<&Array2<bool>>,
    window: ValidWindow,
    sigma: f32,
) -> Result<Threshold> {
    let usable = Array2::from_shape_fn(data.dim(), |idx| {
        window.contains(data[idx]) && good_mask.is_none_or(|m| m[idx])
    });
    let stats = compute_stats(&data.view(), Some(&usable.view()), window)?;
    let background = stats.median as f32;
    let std = stats.std as f32;
    Ok(Threshold {
        background,
        std,
        level: background + sigma * std,
    })
}
