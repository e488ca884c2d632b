use ndarray::Array2;
use tracing::debug;

use crate::error::Result;
use crate::photometry::subframe_origin;
use crate::pipeline::config::DetectionConfig;
use crate::stats::ValidWindow;

use super::components::connected_components;
use super::threshold::median_sigma_threshold;

/// A point-source candidate on a master light.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceCandidate {
    /// Intensity-weighted centroid (row, col).
    pub centroid: (f64, f64),
    pub peak: f32,
    pub area: usize,
}

/// Find the brightest compact sources whose `2 * half_width` sub-frame fits
/// inside the image.
///
/// Candidates are ranked by peak value, brightest first, and truncated to
/// `config.brightest`.
pub fn detect_sources(
    data: &Array2<f32>,
    good_mask: Option<&Array2<bool>>,
    window: ValidWindow,
    config: &DetectionConfig,
    half_width: usize,
) -> Result<Vec<SourceCandidate>> {
    let threshold = median_sigma_threshold(data, good_mask, window, config.sigma)?;
    let above = data.mapv(|v| v > threshold.level);
    let components = connected_components(&above, data, threshold.background);
    let (h, w) = data.dim();

    let total = components.len();
    let mut candidates: Vec<SourceCandidate> = components
        .into_iter()
        .filter(|c| c.area >= config.min_area)
        .filter(|c| subframe_origin(c.centroid, half_width, (h, w)).is_ok())
        .map(|c| SourceCandidate {
            centroid: c.centroid,
            peak: c.peak,
            area: c.area,
        })
        .collect();
    candidates.sort_by(|a, b| b.peak.total_cmp(&a.peak));
    candidates.truncate(config.brightest);

    debug!(
        threshold = threshold.level,
        background = threshold.background,
        components = total,
        kept = candidates.len(),
        "Source detection"
    );
    Ok(candidates)
}
