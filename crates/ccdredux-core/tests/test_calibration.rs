mod common;

use approx::assert_relative_eq;
use ccdredux_core::calibration::{
    combine_masks, CalibrationChain, CalibrationIndex, GroupStage, MaskCombination,
};
use ccdredux_core::error::{IndexLevel, ReduxError};
use ccdredux_core::frame::{FrameKind, GroupKey};
use ccdredux_core::pipeline::config::CalibrationConfig;
use ccdredux_core::stack::SigmaClipParams;
use ndarray::Array2;

use common::{flat_frame, index_of, make_frame, ripple, synthetic_night};

const SAT: f32 = 65_535.0;

fn light_group(index: &CalibrationIndex, filter: char, gain: u32, t: f64) -> &ccdredux_core::group::FrameGroup {
    index
        .get(&GroupKey::new(FrameKind::Light, Some(filter), gain, t))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Full chain
// ---------------------------------------------------------------------------

#[test]
fn test_light_equal_to_dark_gives_zero_master() {
    let shape = (6, 6);
    let dark = ripple(shape, 5.0, 0) + 300.0;
    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(make_frame(dark.clone(), FrameKind::Dark, None, 5, 20.0));
        frames.push(make_frame(dark.clone(), FrameKind::Light, Some('R'), 5, 20.0));
        frames.push(flat_frame(shape, 1000.0, FrameKind::Flat, Some('R'), 5, 20.0));
    }
    let index = index_of(frames);
    let config = CalibrationConfig::default();
    let clip = SigmaClipParams {
        reject_zero: false,
        ..Default::default()
    };
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);

    let light = chain.reduce(light_group(&index, 'R', 5, 20.0)).unwrap();
    assert!(light.master.data().iter().all(|&v| v.abs() < 1e-3));
    assert!(light.master.dark_corrected());
    assert!(light.master.flat_corrected());
    assert!(!light.degraded);
    assert_eq!(light.light_frames, 3);
}

#[test]
fn test_synthetic_night_calibrates_to_star_on_background() {
    let shape = (32, 32);
    let index = index_of(synthetic_night(shape, (16.0, 16.0)));
    let config = CalibrationConfig::default();
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);
    chain.check_preconditions().unwrap();

    let light = chain.reduce(light_group(&index, 'V', 100, 10.0)).unwrap();
    let data = light.master.data();
    assert_relative_eq!(data[[0, 0]], 1000.0, epsilon = 1e-2);
    assert_relative_eq!(data[[16, 16]], 6000.0, epsilon = 1e-1);
    assert_eq!(light.masks.combined, 0);
    assert_eq!(light.masks.flat, Some(0));
    assert_eq!(light.masks.dark_for_light, Some(0));
    assert_eq!(light.master.kind(), FrameKind::Master);
    assert_eq!(
        light.master.to_string(),
        "Frame. Type:master, Filter:V, Gain:100, IntTime:10s, Dark Applied, Flat Applied"
    );

    // Reducing again reuses the cached master.
    let again = chain.reduce(light_group(&index, 'V', 100, 10.0)).unwrap();
    assert!(std::ptr::eq(light.master, again.master));
}

// ---------------------------------------------------------------------------
// Master flat
// ---------------------------------------------------------------------------

#[test]
fn test_master_flat_is_normalised_by_its_median() {
    let shape = (4, 4);
    let mut flat = Array2::from_elem(shape, 2100.0f32);
    flat[[0, 0]] = 1100.0;
    flat[[3, 3]] = 100.0;
    let mut frames = vec![];
    for _ in 0..2 {
        frames.push(make_frame(flat.clone(), FrameKind::Flat, Some('B'), 1, 1.0));
        frames.push(flat_frame(shape, 100.0, FrameKind::Dark, None, 1, 1.0));
    }
    let index = index_of(frames);
    let config = CalibrationConfig::default();
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);

    let flats = chain.resolve_flats(Some('B'), 1).unwrap();
    let dark = chain.master_dark(1, 1.0).unwrap();
    let master = chain.master_flat(flats, &dark).unwrap();
    let data = master.data();
    assert_relative_eq!(data[[1, 1]], 1.0);
    assert_relative_eq!(data[[0, 0]], 0.5);
    // Zero after dark subtraction: clamped to 1.
    assert_relative_eq!(data[[3, 3]], 1.0);
    assert!(master.dark_corrected());
}

#[test]
fn test_shortest_flat_time_is_used() {
    let shape = (2, 2);
    let index = index_of(vec![
        flat_frame(shape, 500.0, FrameKind::Flat, Some('V'), 1, 3.0),
        flat_frame(shape, 500.0, FrameKind::Flat, Some('V'), 1, 0.5),
    ]);
    let config = CalibrationConfig::default();
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);
    let flats = chain.resolve_flats(Some('V'), 1).unwrap();
    assert_eq!(flats.key().int_time.seconds(), 0.5);

    let err = chain.resolve_flats(Some('I'), 1).unwrap_err();
    assert!(matches!(
        err,
        ReduxError::NoFlatForFilterGain {
            level: IndexLevel::Filter,
            ..
        }
    ));
}

// ---------------------------------------------------------------------------
// Dark resolution and force
// ---------------------------------------------------------------------------

fn mismatched_dark_frames(with_bias: bool) -> Vec<ccdredux_core::frame::Frame> {
    let shape = (4, 4);
    let mut frames = vec![
        flat_frame(shape, 400.0, FrameKind::Light, Some('V'), 10, 20.0),
        flat_frame(shape, 120.0, FrameKind::Dark, None, 10, 10.0),
        flat_frame(shape, 150.0, FrameKind::Dark, None, 10, 60.0),
    ];
    if with_bias {
        frames.push(flat_frame(shape, 100.0, FrameKind::Bias, None, 10, 0.0));
    }
    frames
}

#[test]
fn test_master_dark_statistics_use_the_configured_saturation() {
    let darks = || {
        let mut data = Array2::from_elem((4, 4), 100.0f32);
        data[[1, 2]] = 400.0;
        index_of((0..3).map(|_| make_frame(data.clone(), FrameKind::Dark, None, 7, 5.0)).collect())
    };
    let config = CalibrationConfig::default();
    let clip = SigmaClipParams::default();

    let index = darks();
    let dark = CalibrationChain::new(&index, &config, &clip, 300.0)
        .master_dark(7, 5.0)
        .unwrap();
    assert_eq!(dark.frame.stats().max, 100.0);

    let index = darks();
    let dark = CalibrationChain::new(&index, &config, &clip, SAT)
        .master_dark(7, 5.0)
        .unwrap();
    assert_eq!(dark.frame.stats().max, 400.0);
}

#[test]
fn test_missing_dark_time_fails_without_force() {
    let index = index_of(mismatched_dark_frames(false));
    let config = CalibrationConfig {
        skip_flat: true,
        ..Default::default()
    };
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);

    let failure = chain.reduce(light_group(&index, 'V', 10, 20.0)).unwrap_err();
    assert!(matches!(
        failure.error,
        ReduxError::NoDarkForGainTime {
            gain: 10,
            level: IndexLevel::IntTime,
            ..
        }
    ));
    assert_eq!(
        failure.error.to_string(),
        "No dark frames for gain 10 and integration time 20s (missing integration time)"
    );
    assert_eq!(failure.stage, GroupStage::Unstarted);
    assert!(failure.to_string().contains("failed after 'Unstarted'"));
}

#[test]
fn test_forced_dark_uses_nearest_time_and_is_degraded() {
    let index = index_of(mismatched_dark_frames(false));
    let config = CalibrationConfig {
        skip_flat: true,
        force: true,
        ..Default::default()
    };
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);

    let dark = chain.master_dark(10, 20.0).unwrap();
    assert!(dark.degraded);
    assert_eq!(dark.source_time, 10.0);

    let light = chain.reduce(light_group(&index, 'V', 10, 20.0)).unwrap();
    assert!(light.degraded);
    assert!(light.master.data().iter().all(|&v| v == 280.0));
    assert!(!light.master.flat_corrected());
    assert_eq!(light.masks.flat, None);
}

#[test]
fn test_forced_dark_is_scaled_with_bias() {
    let index = index_of(mismatched_dark_frames(true));
    let config = CalibrationConfig {
        skip_flat: true,
        force: true,
        ..Default::default()
    };
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);

    // bias 100 + (120 - 100) * 20 / 10
    let dark = chain.master_dark(10, 20.0).unwrap();
    assert!(dark.degraded);
    assert!(dark.frame.data().iter().all(|&v| (v - 140.0).abs() < 1e-4));
    assert_eq!(dark.frame.int_time(), 20.0);
}

#[test]
fn test_gain_mismatch_is_never_forced() {
    let index = index_of(mismatched_dark_frames(false));
    let config = CalibrationConfig {
        skip_flat: true,
        force: true,
        ..Default::default()
    };
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);
    let err = chain.master_dark(99, 20.0).unwrap_err();
    assert!(matches!(
        err,
        ReduxError::NoDarkForGainTime {
            level: IndexLevel::Gain,
            ..
        }
    ));
}

// ---------------------------------------------------------------------------
// Failures and preconditions
// ---------------------------------------------------------------------------

#[test]
fn test_light_dark_shape_mismatch() {
    let index = index_of(vec![
        flat_frame((4, 4), 400.0, FrameKind::Light, Some('V'), 1, 5.0),
        flat_frame((4, 6), 100.0, FrameKind::Dark, None, 1, 5.0),
    ]);
    let config = CalibrationConfig {
        skip_flat: true,
        ..Default::default()
    };
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);

    let failure = chain.reduce(light_group(&index, 'V', 1, 5.0)).unwrap_err();
    assert!(matches!(
        failure.error,
        ReduxError::ShapeMismatch {
            expected: (4, 4),
            found: (4, 6)
        }
    ));
    assert_eq!(failure.stage, GroupStage::DarksForLightResolved);
}

#[test]
fn test_missing_flat_dark_fails_after_flats_resolved() {
    let index = index_of(vec![
        flat_frame((4, 4), 400.0, FrameKind::Light, Some('V'), 1, 5.0),
        flat_frame((4, 4), 100.0, FrameKind::Dark, None, 1, 5.0),
        flat_frame((4, 4), 9000.0, FrameKind::Flat, Some('V'), 1, 2.0),
    ]);
    let config = CalibrationConfig::default();
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);

    let failure = chain.reduce(light_group(&index, 'V', 1, 5.0)).unwrap_err();
    assert_eq!(failure.stage, GroupStage::FlatsResolved);
    assert!(matches!(failure.error, ReduxError::NoDarkForGainTime { .. }));
}

#[test]
fn test_preconditions() {
    let clip = SigmaClipParams::default();
    let config = CalibrationConfig::default();

    let empty = CalibrationIndex::new();
    let err = CalibrationChain::new(&empty, &config, &clip, SAT)
        .check_preconditions()
        .unwrap_err();
    assert!(matches!(
        err,
        ReduxError::IndexMiss {
            kind: FrameKind::Light,
            level: IndexLevel::Kind
        }
    ));

    let lights_only = index_of(vec![flat_frame((2, 2), 1.0, FrameKind::Light, Some('V'), 1, 1.0)]);
    let err = CalibrationChain::new(&lights_only, &config, &clip, SAT)
        .check_preconditions()
        .unwrap_err();
    assert!(matches!(
        err,
        ReduxError::NoDarkForGainTime {
            level: IndexLevel::Kind,
            ..
        }
    ));
    assert_eq!(err.to_string(), "No dark frames in the calibration index");

    let no_flats = CalibrationConfig {
        skip_flat: true,
        skip_dark: true,
        ..Default::default()
    };
    CalibrationChain::new(&lights_only, &no_flats, &clip, SAT)
        .check_preconditions()
        .unwrap();
}

#[test]
fn test_uncalibrated_light_keeps_flags_clear() {
    let index = index_of(vec![
        flat_frame((3, 3), 42.0, FrameKind::Light, Some('V'), 1, 1.0),
        flat_frame((3, 3), 42.0, FrameKind::Light, Some('V'), 1, 1.0),
    ]);
    let config = CalibrationConfig {
        skip_flat: true,
        skip_dark: true,
        ..Default::default()
    };
    let clip = SigmaClipParams::default();
    let chain = CalibrationChain::new(&index, &config, &clip, SAT);
    let light = chain.reduce(light_group(&index, 'V', 1, 1.0)).unwrap();
    assert!(!light.master.dark_corrected());
    assert!(!light.master.flat_corrected());
    assert_eq!(light.masks.dark_for_light, None);
    assert!(light.master.data().iter().all(|&v| v == 42.0));
}

// ---------------------------------------------------------------------------
// Mask combination
// ---------------------------------------------------------------------------

#[test]
fn test_mask_combination_rules() {
    let mut light = Array2::from_elem((2, 2), true);
    light[[0, 0]] = false;
    let mut dark = Array2::from_elem((2, 2), true);
    dark[[1, 1]] = false;

    let all = combine_masks(&[&light, &dark], MaskCombination::All).unwrap();
    assert!(!all[[0, 0]] && !all[[1, 1]]);
    assert!(all[[0, 1]] && all[[1, 0]]);

    let good = Array2::from_elem((2, 2), true);
    let xor = combine_masks(&[&good, &good, &good, &good], MaskCombination::ExclusiveOr).unwrap();
    assert!(xor.iter().all(|&v| !v));

    let err = combine_masks(&[&good, &Array2::from_elem((3, 2), true)], MaskCombination::All)
        .unwrap_err();
    assert!(matches!(err, ReduxError::ShapeMismatch { .. }));
}
