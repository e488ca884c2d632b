//! TOML frame manifests: the list of exposures a reduction ingests.
//!
//! ```toml
//! [[frame]]
//! path = "lights/m13_V_001.tif"
//! kind = "light"
//! filter = "V"
//! gain = 100
//! exposure = 30.0
//!
//! [frame.header]
//! OBJECT = "M13"
//! ```
//!
//! Relative paths resolve against the manifest's own directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::CalibrationIndex;
use crate::error::{ReduxError, Result};
use crate::frame::{Frame, FrameHeader, FrameKind};
use crate::pipeline::config::ReductionConfig;

use super::image_io::{is_supported_image, load_adu};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "frame")]
    pub frames: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub kind: FrameKind,
    /// Single-letter filter tag. Ignored for darks and biases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<char>,
    pub gain: u32,
    /// Integration time in seconds.
    pub exposure: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: BTreeMap<String, String>,
}

impl ManifestEntry {
    /// Filter the frame is indexed under; darks and biases carry none.
    pub fn effective_filter(&self) -> Option<char> {
        match self.kind {
            FrameKind::Dark | FrameKind::Bias => None,
            _ => self.filter.map(|c| c.to_ascii_uppercase()),
        }
    }
}

/// Outcome of building an index from a manifest.
#[derive(Debug, Default)]
pub struct Ingested {
    pub index: CalibrationIndex,
    /// Entries skipped by configuration (excluded filter, disabled stage).
    pub skipped: usize,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ReduxError::Manifest(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReduxError::Manifest(e.to_string()))
    }

    /// Whether `entry` takes part in a run with `config`.
    pub fn accepts(entry: &ManifestEntry, config: &ReductionConfig) -> bool {
        match entry.kind {
            FrameKind::Flat if config.calibration.skip_flat => false,
            FrameKind::Dark | FrameKind::Bias if config.calibration.skip_dark => false,
            _ => config.accepts_filter(entry.effective_filter()),
        }
    }

    /// Load every accepted frame and group it into a calibration index.
    ///
    /// Images are decoded in parallel; frames enter the index in manifest
    /// order, so group contents are deterministic.
    pub fn ingest(&self, base_dir: &Path, config: &ReductionConfig) -> Result<Ingested> {
        let accepted: Vec<&ManifestEntry> = self
            .frames
            .iter()
            .filter(|e| Self::accepts(e, config))
            .collect();
        let skipped = self.frames.len() - accepted.len();

        let saturation = config.stacking.saturation;
        let frames: Vec<Frame> = accepted
            .par_iter()
            .map(|entry| load_entry(entry, base_dir, saturation))
            .collect::<Result<Vec<_>>>()?;

        let mut index = CalibrationIndex::new();
        for frame in frames {
            debug!(frame = %frame, "Ingested");
            index.upsert(frame)?;
        }
        info!(
            frames = index.frame_count(),
            groups = index.len(),
            skipped,
            "Calibration index built"
        );
        Ok(Ingested { index, skipped })
    }
}

fn load_entry(entry: &ManifestEntry, base_dir: &Path, saturation: f32) -> Result<Frame> {
    let path = if entry.path.is_absolute() {
        entry.path.clone()
    } else {
        base_dir.join(&entry.path)
    };
    if !entry.exposure.is_finite() || entry.exposure < 0.0 {
        return Err(ReduxError::Manifest(format!(
            "{}: invalid exposure {}",
            entry.path.display(),
            entry.exposure
        )));
    }
    let data = load_adu(&path)?;
    let mut header = entry.header.clone();
    header
        .entry("FILENAME".into())
        .or_insert_with(|| entry.path.display().to_string());
    Frame::with_saturation(
        data,
        entry.kind,
        entry.effective_filter(),
        entry.gain,
        entry.exposure,
        FrameHeader(header),
        saturation,
    )
}

/// Build a skeleton manifest from the images found under `dir`.
///
/// The frame type is guessed from the path (a component or file name
/// containing `bias`, `dark`, `flat` or `light`; anything else is a light).
/// Gain, exposure and filter are left for the user to fill in.
pub fn scan_directory(dir: &Path) -> Result<Manifest> {
    let mut paths = Vec::new();
    collect_images(dir, &mut paths)?;
    paths.sort();

    let frames = paths
        .into_iter()
        .map(|p| {
            let rel = p.strip_prefix(dir).map(Path::to_path_buf).unwrap_or(p);
            ManifestEntry {
                kind: guess_kind(&rel),
                path: rel,
                filter: None,
                gain: 0,
                exposure: 0.0,
                header: BTreeMap::new(),
            }
        })
        .collect();
    Ok(Manifest { frames })
}

fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if is_supported_image(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn guess_kind(path: &Path) -> FrameKind {
    let lower = path.to_string_lossy().to_ascii_lowercase();
    [
        ("bias", FrameKind::Bias),
        ("dark", FrameKind::Dark),
        ("flat", FrameKind::Flat),
    ]
    .into_iter()
    .find(|(word, _)| lower.contains(word))
    .map(|(_, kind)| kind)
    .unwrap_or(FrameKind::Light)
}
