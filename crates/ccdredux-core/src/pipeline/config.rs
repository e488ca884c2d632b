use serde::{Deserialize, Serialize};

use crate::calibration::mask::MaskCombination;
use crate::consts::{
    DEFAULT_APERTURE_RADIUS, DEFAULT_BRIGHTEST_SOURCES, DEFAULT_DETECTION_MIN_AREA,
    DEFAULT_DETECTION_SIGMA, DEFAULT_FIT_MAX_ITERATIONS, DEFAULT_INITIAL_FIT_SIGMA,
    DEFAULT_SATURATION_THRESHOLD, DEFAULT_SUBFRAME_HALF_WIDTH,
};
use crate::error::{ReduxError, Result};
use crate::stack::sigma_clip::SigmaClipParams;

/// Full configuration of one reduction run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReductionConfig {
    #[serde(default)]
    pub stacking: StackingConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub photometry: PhotometryConfig,
    /// Filters whose frames are ignored at ingestion.
    #[serde(default)]
    pub exclude_filters: Vec<char>,
}

impl ReductionConfig {
    /// Reject settings that cannot produce a meaningful reduction.
    pub fn validate(&self) -> Result<()> {
        let clip = &self.stacking.clip;
        if clip.sigma.is_nan() || clip.sigma <= 0.0 {
            return Err(ReduxError::InvalidConfig(format!(
                "clip sigma must be positive, got {}",
                clip.sigma
            )));
        }
        if self.stacking.saturation.is_nan() || self.stacking.saturation <= 0.0 {
            return Err(ReduxError::InvalidConfig(format!(
                "saturation threshold must be positive, got {}",
                self.stacking.saturation
            )));
        }
        if self.calibration.skip_dark && !self.calibration.skip_flat {
            return Err(ReduxError::InvalidConfig(
                "flat calibration needs dark frames; skip flats as well or keep darks".into(),
            ));
        }
        let phot = &self.photometry;
        if phot.half_width == 0 {
            return Err(ReduxError::InvalidConfig(
                "sub-frame half-width must be at least 1".into(),
            ));
        }
        if phot.aperture_radius == 0 || phot.aperture_radius > phot.half_width {
            return Err(ReduxError::InvalidConfig(format!(
                "aperture radius {} must be in 1..={} (the sub-frame half-width)",
                phot.aperture_radius, phot.half_width
            )));
        }
        if phot.smoothing_sigma < 0.0 || !phot.smoothing_sigma.is_finite() {
            return Err(ReduxError::InvalidConfig(format!(
                "smoothing sigma must be zero or positive, got {}",
                phot.smoothing_sigma
            )));
        }
        if phot.max_iterations == 0 {
            return Err(ReduxError::InvalidConfig(
                "fit iteration limit must be at least 1".into(),
            ));
        }
        if self.detection.sigma.is_nan() || self.detection.sigma <= 0.0 {
            return Err(ReduxError::InvalidConfig(format!(
                "detection sigma must be positive, got {}",
                self.detection.sigma
            )));
        }
        if self.detection.brightest == 0 {
            return Err(ReduxError::InvalidConfig(
                "at least one source must be kept per master light".into(),
            ));
        }
        Ok(())
    }

    /// Whether frames with `filter` should be ingested.
    pub fn accepts_filter(&self, filter: Option<char>) -> bool {
        match filter {
            Some(f) => !self
                .exclude_filters
                .iter()
                .any(|x| x.eq_ignore_ascii_case(&f)),
            None => true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackingConfig {
    #[serde(default)]
    pub clip: SigmaClipParams,
    /// ADU at or above which a pixel is saturated.
    #[serde(default = "default_saturation")]
    pub saturation: f32,
}

fn default_saturation() -> f32 {
    DEFAULT_SATURATION_THRESHOLD
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            clip: SigmaClipParams::default(),
            saturation: DEFAULT_SATURATION_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Use the nearest-time dark when no dark matches a light's
    /// integration time. Gain mismatches are never forced.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub skip_dark: bool,
    #[serde(default)]
    pub skip_flat: bool,
    #[serde(default)]
    pub mask_combination: MaskCombination,
    /// Under `force`, rescale the thermal part of the substitute dark by the
    /// ratio of integration times when a bias for the same gain exists.
    #[serde(default = "default_scale_dark")]
    pub scale_dark_with_bias: bool,
}

fn default_scale_dark() -> bool {
    true
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            force: false,
            skip_dark: false,
            skip_flat: false,
            mask_combination: MaskCombination::default(),
            scale_dark_with_bias: true,
        }
    }
}

/// Source detection on a calibrated master light.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Threshold = median + sigma * std of the valid pixels.
    #[serde(default = "default_detection_sigma")]
    pub sigma: f32,
    /// Minimum connected component area (pixels) to be a source candidate.
    #[serde(default = "default_min_area")]
    pub min_area: usize,
    /// Number of candidates kept, brightest peak first.
    #[serde(default = "default_brightest")]
    pub brightest: usize,
}

fn default_detection_sigma() -> f32 {
    DEFAULT_DETECTION_SIGMA
}
fn default_min_area() -> usize {
    DEFAULT_DETECTION_MIN_AREA
}
fn default_brightest() -> usize {
    DEFAULT_BRIGHTEST_SOURCES
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_DETECTION_SIGMA,
            min_area: DEFAULT_DETECTION_MIN_AREA,
            brightest: DEFAULT_BRIGHTEST_SOURCES,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhotometryConfig {
    /// Aperture radius `R` in pixels.
    #[serde(default = "default_radius")]
    pub aperture_radius: usize,
    /// Sub-frame half-width `L`; sub-frames are `2L` square.
    #[serde(default = "default_half_width")]
    pub half_width: usize,
    /// Gaussian pre-smoothing sigma in pixels (0 disables).
    #[serde(default)]
    pub smoothing_sigma: f32,
    /// Keep sigma, amplitude and background non-negative during the fit.
    #[serde(default = "default_bounded")]
    pub bounded_fit: bool,
    #[serde(default = "default_initial_sigma")]
    pub initial_sigma: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_radius() -> usize {
    DEFAULT_APERTURE_RADIUS
}
fn default_half_width() -> usize {
    DEFAULT_SUBFRAME_HALF_WIDTH
}
fn default_bounded() -> bool {
    true
}
fn default_initial_sigma() -> f64 {
    DEFAULT_INITIAL_FIT_SIGMA
}
fn default_max_iterations() -> usize {
    DEFAULT_FIT_MAX_ITERATIONS
}

impl Default for PhotometryConfig {
    fn default() -> Self {
        Self {
            aperture_radius: DEFAULT_APERTURE_RADIUS,
            half_width: DEFAULT_SUBFRAME_HALF_WIDTH,
            smoothing_sigma: 0.0,
            bounded_fit: true,
            initial_sigma: DEFAULT_INITIAL_FIT_SIGMA,
            max_iterations: DEFAULT_FIT_MAX_ITERATIONS,
        }
    }
}
