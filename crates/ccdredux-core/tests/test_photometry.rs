mod common;

use approx::assert_relative_eq;
use ccdredux_core::detection::{detect_sources, SourceCandidate};
use ccdredux_core::error::ReduxError;
use ccdredux_core::frame::FrameKind;
use ccdredux_core::photometry::{
    measure_aperture, measure_sources, subframe_origin, ApertureMask,
};
use ccdredux_core::pipeline::config::{DetectionConfig, PhotometryConfig};
use ccdredux_core::stats::ValidWindow;
use ndarray::Array2;

use common::{gaussian_flux, gaussian_star, make_frame};

// ---------------------------------------------------------------------------
// Aperture sums
// ---------------------------------------------------------------------------

#[test]
fn test_known_excess_over_background() {
    let l = 10;
    let ap = ApertureMask::new(l, 5);
    let mut sub = Array2::from_elem((2 * l, 2 * l), 100.0f32);
    sub[[10, 10]] = 1100.0;
    sub[[10, 11]] = 600.0;
    // Outside the aperture: ignored.
    sub[[0, 0]] = 90_000.0;

    let m = measure_aperture(&sub.view(), None, &ap, 100.0, 2.0).unwrap();
    assert_relative_eq!(m.counts, 1500.0);
    assert_eq!(m.n_pix, ap.n_pix());
    assert_eq!(m.n_good, ap.n_pix());
    let flux = 1500.0 / ap.n_pix() as f64 / 2.0;
    assert_relative_eq!(m.count_flux, flux);
    assert_relative_eq!(m.instrumental_magnitude, -2.5 * flux.log10());
}

#[test]
fn test_residuals_below_background_do_not_count() {
    let ap = ApertureMask::new(4, 3);
    let mut sub = Array2::from_elem((8, 8), 10.0f32);
    sub[[4, 4]] = 60.0;
    sub[[4, 5]] = 0.0;
    let m = measure_aperture(&sub.view(), None, &ap, 10.0, 1.0).unwrap();
    assert_relative_eq!(m.counts, 50.0);
}

#[test]
fn test_flat_subframe_has_no_flux() {
    let ap = ApertureMask::new(4, 3);
    let sub = Array2::from_elem((8, 8), 10.0f32);
    let err = measure_aperture(&sub.view(), None, &ap, 10.0, 1.0).unwrap_err();
    assert!(matches!(err, ReduxError::NonPositiveFlux { .. }));
}

#[test]
fn test_exposure_time_must_be_positive() {
    let ap = ApertureMask::new(2, 1);
    let sub = Array2::from_elem((4, 4), 10.0f32);
    let err = measure_aperture(&sub.view(), None, &ap, 0.0, 0.0).unwrap_err();
    assert!(matches!(err, ReduxError::InvalidExposureTime(_)));
}

#[test]
fn test_aperture_pixel_count_grows_with_radius() {
    let counts: Vec<usize> = (1..=6).map(|r| ApertureMask::new(6, r).n_pix()).collect();
    assert_eq!(counts[0], 1);
    assert!(counts.windows(2).all(|w| w[1] > w[0]));
    // Never more than the enclosing disc.
    assert!(counts[5] as f64 <= std::f64::consts::PI * 36.0 + 1.0);
}

// ---------------------------------------------------------------------------
// Sub-frame placement
// ---------------------------------------------------------------------------

#[test]
fn test_subframe_origin_truncates() {
    assert_eq!(subframe_origin((20.7, 30.2), 10, (64, 64)).unwrap(), (10, 20));
    assert_eq!(subframe_origin((10.0, 10.0), 10, (20, 20)).unwrap(), (0, 0));
}

#[test]
fn test_subframe_must_fit_inside_image() {
    for centroid in [(5.0, 30.0), (30.0, 9.5), (58.0, 30.0), (30.0, 55.5)] {
        let err = subframe_origin(centroid, 10, (64, 64)).unwrap_err();
        assert!(matches!(err, ReduxError::SubFrameOutOfBounds { .. }));
    }
}

// ---------------------------------------------------------------------------
// Detection and measurement
// ---------------------------------------------------------------------------

fn two_star_master() -> Array2<f32> {
    let a = gaussian_star((80, 80), (25.0, 30.0), 2.0, 4000.0, 0.0);
    let b = gaussian_star((80, 80), (55.0, 50.0), 2.0, 1500.0, 0.0);
    a + b + 800.0
}

#[test]
fn test_detection_ranks_by_peak() {
    let data = two_star_master();
    let config = DetectionConfig::default();
    let found = detect_sources(&data, None, ValidWindow::unsaturated(65_535.0), &config, 15).unwrap();
    assert_eq!(found.len(), 2);
    assert!(found[0].peak > found[1].peak);
    assert_relative_eq!(found[0].centroid.0, 25.0, epsilon = 0.05);
    assert_relative_eq!(found[0].centroid.1, 30.0, epsilon = 0.05);
    assert_relative_eq!(found[1].centroid.0, 55.0, epsilon = 0.05);

    let one = DetectionConfig {
        brightest: 1,
        ..Default::default()
    };
    let found = detect_sources(&data, None, ValidWindow::unsaturated(65_535.0), &one, 15).unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn test_detection_drops_sources_near_the_edge() {
    let data = gaussian_star((64, 64), (5.0, 32.0), 2.0, 4000.0, 500.0);
    let found = detect_sources(
        &data,
        None,
        ValidWindow::unsaturated(65_535.0),
        &DetectionConfig::default(),
        10,
    )
    .unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_measured_flux_matches_injected_star() {
    let master = make_frame(two_star_master(), FrameKind::Master, Some('V'), 1, 4.0);
    let candidates = detect_sources(
        master.data(),
        None,
        ValidWindow::unsaturated(65_535.0),
        &DetectionConfig::default(),
        15,
    )
    .unwrap();
    let config = PhotometryConfig {
        aperture_radius: 12,
        ..Default::default()
    };
    let table = measure_sources(&master, master.data(), &candidates, &config);
    assert_eq!(table.measured.len(), 2);
    assert!(table.skipped.is_empty());

    let bright = &table.measured[0];
    assert_eq!(bright.sub_frame.dim(), (30, 30));
    assert_eq!(bright.radial_profile.len(), 15);
    assert!(bright.r_squared > 0.95);
    assert_relative_eq!(bright.fit.background, 800.0, epsilon = 10.0);
    let expected = gaussian_flux(2.0, 4000.0);
    assert_relative_eq!(bright.aperture.counts, expected, max_relative = 0.1);

    let faint = &table.measured[1];
    assert!(faint.aperture.instrumental_magnitude > bright.aperture.instrumental_magnitude);
}

#[test]
fn test_unmeasurable_source_is_skipped_not_fatal() {
    let master = make_frame(Array2::zeros((40, 40)), FrameKind::Master, None, 1, 1.0);
    let candidates = vec![
        SourceCandidate {
            centroid: (20.0, 20.0),
            peak: 0.0,
            area: 4,
        },
        SourceCandidate {
            centroid: (2.0, 2.0),
            peak: 0.0,
            area: 4,
        },
    ];
    let config = PhotometryConfig {
        half_width: 10,
        aperture_radius: 5,
        ..Default::default()
    };
    let table = measure_sources(&master, master.data(), &candidates, &config);
    assert!(table.measured.is_empty());
    assert_eq!(table.skipped.len(), 2);
    assert_eq!(table.skipped[1].id, 1);
    assert!(table.skipped[1].reason.contains("leaves the image"));
}
