mod common;

use std::path::Path;

use ccdredux_core::error::ReduxError;
use ccdredux_core::frame::{FrameKind, GroupKey};
use ccdredux_core::io::{load_adu, save_mask_png, save_tiff, scan_directory, Manifest};
use ccdredux_core::pipeline::config::ReductionConfig;
use ndarray::Array2;

use common::ripple;

fn write_frame(dir: &Path, name: &str, value: f32) {
    let data = Array2::from_elem((6, 8), value) + ripple((6, 8), 2.0, 0);
    save_tiff(&data, &dir.join(name)).unwrap();
}

const MANIFEST: &str = r#"
[[frame]]
path = "darks/dark_1.tiff"
kind = "dark"
filter = "V"
gain = 100
exposure = 10.0

[[frame]]
path = "darks/dark_2.tiff"
kind = "dark"
gain = 100
exposure = 10.0

[[frame]]
path = "flats/flat_v.tiff"
kind = "flat"
filter = "v"
gain = 100
exposure = 1.0

[[frame]]
path = "lights/m13_v.tiff"
kind = "light"
filter = "V"
gain = 100
exposure = 10.0

[frame.header]
OBJECT = "M13"

[[frame]]
path = "lights/m13_b.tiff"
kind = "light"
filter = "B"
gain = 100
exposure = 10.0
"#;

fn populate(dir: &Path) {
    for sub in ["darks", "flats", "lights"] {
        std::fs::create_dir_all(dir.join(sub)).unwrap();
    }
    write_frame(dir, "darks/dark_1.tiff", 100.0);
    write_frame(dir, "darks/dark_2.tiff", 102.0);
    write_frame(dir, "flats/flat_v.tiff", 20_000.0);
    write_frame(dir, "lights/m13_v.tiff", 1_500.0);
    write_frame(dir, "lights/m13_b.tiff", 1_200.0);
}

// ---------------------------------------------------------------------------
// Image I/O
// ---------------------------------------------------------------------------

#[test]
fn test_tiff_round_trip_keeps_adu() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.tiff");
    let data = Array2::from_shape_fn((5, 7), |(r, c)| (r * 1000 + c * 7) as f32 + 0.4);
    save_tiff(&data, &path).unwrap();

    let back = load_adu(&path).unwrap();
    assert_eq!(back.dim(), (5, 7));
    assert_eq!(back[[0, 0]], 0.0);
    assert_eq!(back[[4, 6]], 4042.0);
}

#[test]
fn test_tiff_clamps_out_of_range_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clamped.tif");
    let data = Array2::from_shape_vec((1, 3), vec![-50.0f32, 70_000.0, 12.0]).unwrap();
    save_tiff(&data, &path).unwrap();
    let back = load_adu(&path).unwrap();
    assert_eq!(back.as_slice().unwrap(), &[0.0, 65_535.0, 12.0]);
}

#[test]
fn test_mask_png_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("badmap.png");
    let mut mask = Array2::from_elem((4, 4), true);
    mask[[1, 2]] = false;
    save_mask_png(&mask, &path).unwrap();
    let back = load_adu(&path).unwrap();
    assert_eq!(back[[1, 2]], 0.0);
    assert_eq!(back[[0, 0]], 65_535.0);
}

#[test]
fn test_missing_image_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_adu(&dir.path().join("nope.tiff")).is_err());
}

// ---------------------------------------------------------------------------
// Manifest parsing
// ---------------------------------------------------------------------------

#[test]
fn test_manifest_parses_entries() {
    let manifest = Manifest::parse(MANIFEST).unwrap();
    assert_eq!(manifest.frames.len(), 5);
    assert_eq!(manifest.frames[0].kind, FrameKind::Dark);
    assert_eq!(manifest.frames[0].effective_filter(), None);
    assert_eq!(manifest.frames[2].effective_filter(), Some('V'));
    assert_eq!(manifest.frames[3].header.get("OBJECT").map(String::as_str), Some("M13"));
}

#[test]
fn test_manifest_rejects_unknown_kind() {
    let text = r#"
        [[frame]]
        path = "x.tiff"
        kind = "sky"
        gain = 1
        exposure = 1.0
    "#;
    assert!(matches!(Manifest::parse(text), Err(ReduxError::Manifest(_))));
}

#[test]
fn test_manifest_toml_round_trip() {
    let manifest = Manifest::parse(MANIFEST).unwrap();
    let text = manifest.to_toml().unwrap();
    assert_eq!(Manifest::parse(&text).unwrap(), manifest);
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[test]
fn test_ingest_builds_index() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    let manifest = Manifest::parse(MANIFEST).unwrap();

    let ingested = manifest.ingest(dir.path(), &ReductionConfig::default()).unwrap();
    assert_eq!(ingested.skipped, 0);
    assert_eq!(ingested.index.frame_count(), 5);
    // Both darks share a group even though one was tagged with a filter.
    let darks = ingested
        .index
        .get(&GroupKey::new(FrameKind::Dark, None, 100, 10.0))
        .unwrap();
    assert_eq!(darks.len(), 2);

    let light = ingested
        .index
        .get(&GroupKey::new(FrameKind::Light, Some('V'), 100, 10.0))
        .unwrap();
    let header = light.frames()[0].header();
    assert_eq!(header.get("OBJECT"), Some("M13"));
    assert_eq!(header.get("FILENAME"), Some("lights/m13_v.tiff"));
    assert_eq!(light.shape(), (6, 8));
}

#[test]
fn test_ingest_honours_exclusions() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    let manifest = Manifest::parse(MANIFEST).unwrap();

    let mut config = ReductionConfig::default();
    config.exclude_filters = vec!['b'];
    config.calibration.skip_flat = true;
    let ingested = manifest.ingest(dir.path(), &config).unwrap();
    assert_eq!(ingested.skipped, 2);
    assert!(!ingested.index.contains_kind(FrameKind::Flat));
    assert_eq!(ingested.index.groups_of(FrameKind::Light).count(), 1);
}

#[test]
fn test_ingest_fails_on_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = Manifest::parse(MANIFEST).unwrap();
    assert!(manifest.ingest(dir.path(), &ReductionConfig::default()).is_err());
}

#[test]
fn test_scan_directory_guesses_kinds() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

    let manifest = scan_directory(dir.path()).unwrap();
    assert_eq!(manifest.frames.len(), 5);
    let kinds: Vec<FrameKind> = manifest.frames.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            FrameKind::Dark,
            FrameKind::Dark,
            FrameKind::Flat,
            FrameKind::Light,
            FrameKind::Light
        ]
    );
    assert!(manifest.frames.iter().all(|e| e.path.is_relative()));
}
