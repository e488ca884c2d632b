/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum number of light groups to reduce groups in parallel.
pub const PARALLEL_GROUP_THRESHOLD: usize = 2;

/// Pixels at or above this value are treated as saturated (16-bit ADC ceiling).
pub const DEFAULT_SATURATION_THRESHOLD: f32 = 65_535.0;

/// Default sigma-clip width `k`, in standard deviations.
pub const DEFAULT_CLIP_SIGMA: f64 = 3.0;

/// Scale from the median absolute deviation to a Gaussian standard deviation.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Default aperture radius in pixels for photometry.
pub const DEFAULT_APERTURE_RADIUS: usize = 15;

/// Default sub-frame half-width `L` in pixels (sub-frames are `2L` square).
pub const DEFAULT_SUBFRAME_HALF_WIDTH: usize = 25;

/// Default initial guess for the Gaussian width of a radial profile.
pub const DEFAULT_INITIAL_FIT_SIGMA: f64 = 2.0;

/// Iteration cap for the Levenberg-Marquardt profile fit.
pub const DEFAULT_FIT_MAX_ITERATIONS: usize = 200;

/// Relative cost change below which the profile fit is considered converged.
pub const FIT_COST_TOLERANCE: f64 = 1e-12;

/// Relative parameter step below which the profile fit is considered converged.
pub const FIT_STEP_TOLERANCE: f64 = 1e-10;

/// Initial Levenberg-Marquardt damping factor.
pub const FIT_INITIAL_DAMPING: f64 = 1e-3;

/// Damping above which the fit gives up (the model cannot reduce the cost).
pub const FIT_MAX_DAMPING: f64 = 1e16;

/// Default detection threshold above the median, in standard deviations.
pub const DEFAULT_DETECTION_SIGMA: f32 = 5.0;

/// Default minimum connected area (pixels) for a source candidate.
pub const DEFAULT_DETECTION_MIN_AREA: usize = 4;

/// Default number of brightest candidates kept per master light.
pub const DEFAULT_BRIGHTEST_SOURCES: usize = 10;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;
