#![allow(dead_code)]

use ccdredux_core::calibration::CalibrationIndex;
use ccdredux_core::frame::{Frame, FrameHeader, FrameKind};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Build a frame with an empty header and the default saturation threshold.
pub fn make_frame(
    data: Array2<f32>,
    kind: FrameKind,
    filter: Option<char>,
    gain: u32,
    int_time: f64,
) -> Frame {
    Frame::new(data, kind, filter, gain, int_time, FrameHeader::default()).unwrap()
}

/// Frame filled with a single value.
pub fn flat_frame(
    shape: (usize, usize),
    value: f32,
    kind: FrameKind,
    filter: Option<char>,
    gain: u32,
    int_time: f64,
) -> Frame {
    make_frame(Array2::from_elem(shape, value), kind, filter, gain, int_time)
}

/// Circular 2-D Gaussian `amplitude * exp(-r^2 / (2 sigma^2)) + background`
/// centred on `(row, col)`.
pub fn gaussian_star(
    shape: (usize, usize),
    centre: (f64, f64),
    sigma: f64,
    amplitude: f64,
    background: f64,
) -> Array2<f32> {
    Array2::from_shape_fn(shape, |(r, c)| {
        let dr = r as f64 - centre.0;
        let dc = c as f64 - centre.1;
        (amplitude * (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp() + background) as f32
    })
}

/// Deterministic low-amplitude pattern in `[-amplitude, amplitude]`.
pub fn ripple(shape: (usize, usize), amplitude: f32, phase: usize) -> Array2<f32> {
    Array2::from_shape_fn(shape, |(r, c)| {
        let k = ((r * 31 + c * 17 + phase * 7) % 13) as f32;
        (k / 6.0 - 1.0) * amplitude
    })
}

/// Seeded zero-mean Gaussian noise (Box-Muller).
pub fn gaussian_noise(shape: (usize, usize), sigma: f32, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_simple_fn(shape, || {
        let u1: f32 = rng.random_range(1e-10f32..1.0);
        let u2: f32 = rng.random_range(0.0f32..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos() * sigma
    })
}

/// Index holding every frame, grouped by key.
pub fn index_of(frames: Vec<Frame>) -> CalibrationIndex {
    let mut index = CalibrationIndex::new();
    for frame in frames {
        index.upsert(frame).unwrap();
    }
    index
}

/// A complete single-filter night: darks at the light and flat exposure
/// times, `V` flats, and three `V` lights of one star.
///
/// After calibration the master light is `1000 + star` with a flat of 1.
pub fn synthetic_night(shape: (usize, usize), star: (f64, f64)) -> Vec<Frame> {
    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(flat_frame(shape, 100.0, FrameKind::Dark, None, 100, 10.0));
        frames.push(flat_frame(shape, 100.0, FrameKind::Dark, None, 100, 1.0));
        frames.push(flat_frame(shape, 20_100.0, FrameKind::Flat, Some('V'), 100, 1.0));
        frames.push(make_frame(
            gaussian_star(shape, star, 2.0, 5000.0, 1100.0),
            FrameKind::Light,
            Some('V'),
            100,
            10.0,
        ));
    }
    frames
}

/// Like [`synthetic_night`] with `lights` light frames, each carrying its
/// own seeded Gaussian noise of `noise` ADU.
pub fn noisy_night(
    shape: (usize, usize),
    star: (f64, f64),
    lights: usize,
    noise: f32,
) -> Vec<Frame> {
    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(flat_frame(shape, 100.0, FrameKind::Dark, None, 100, 10.0));
        frames.push(flat_frame(shape, 100.0, FrameKind::Dark, None, 100, 1.0));
        frames.push(flat_frame(shape, 20_100.0, FrameKind::Flat, Some('V'), 100, 1.0));
    }
    for i in 0..lights {
        let data = gaussian_star(shape, star, 2.0, 5000.0, 1100.0)
            + gaussian_noise(shape, noise, 1000 + i as u64);
        frames.push(make_frame(data, FrameKind::Light, Some('V'), 100, 10.0));
    }
    frames
}

/// Total flux of a 2-D Gaussian.
pub fn gaussian_flux(sigma: f64, amplitude: f64) -> f64 {
    2.0 * std::f64::consts::PI * sigma * sigma * amplitude
}
