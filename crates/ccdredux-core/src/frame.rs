use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_SATURATION_THRESHOLD;
use crate::error::{ReduxError, Result};
use crate::stats::{compute_stats, FrameStats, ValidWindow};

/// Calibration category of an exposure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Bias,
    Dark,
    Flat,
    Light,
    Master,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bias => write!(f, "bias"),
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
            Self::Light => write!(f, "light"),
            Self::Master => write!(f, "master"),
        }
    }
}

impl FromStr for FrameKind {
    type Err = ReduxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bias" => Ok(Self::Bias),
            "dark" => Ok(Self::Dark),
            "flat" => Ok(Self::Flat),
            "light" => Ok(Self::Light),
            "master" => Ok(Self::Master),
            other => Err(ReduxError::Manifest(format!("unknown frame type '{other}'"))),
        }
    }
}

/// Integration time in seconds, usable as a map key.
///
/// Equality and ordering follow `f64::total_cmp`, so two exposures match only
/// when their times are bit-identical (after folding `-0.0` into `0.0`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExposureTime(f64);

impl ExposureTime {
    pub fn new(seconds: f64) -> Self {
        Self(if seconds == 0.0 { 0.0 } else { seconds })
    }

    pub fn seconds(&self) -> f64 {
        self.0
    }
}

impl From<f64> for ExposureTime {
    fn from(seconds: f64) -> Self {
        Self::new(seconds)
    }
}

impl PartialEq for ExposureTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for ExposureTime {}

impl PartialOrd for ExposureTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExposureTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for ExposureTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for ExposureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-exposure metadata carried through from ingestion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameHeader(pub BTreeMap<String, String>);

impl FrameHeader {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Composite key identifying a calibration class:
/// `(type, filter, gain, integration time)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub kind: FrameKind,
    pub filter: Option<char>,
    pub gain: u32,
    pub int_time: ExposureTime,
}

impl GroupKey {
    pub fn new(kind: FrameKind, filter: Option<char>, gain: u32, int_time: f64) -> Self {
        Self {
            kind,
            filter,
            gain,
            int_time: ExposureTime::new(int_time),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/gain {}/{}s",
            self.kind,
            filter_label(self.filter),
            self.gain,
            self.int_time
        )
    }
}

/// Human-readable filter tag; frames without a filter print as `-`.
pub fn filter_label(filter: Option<char>) -> String {
    filter.map(|c| c.to_string()).unwrap_or_else(|| "-".into())
}

/// A single exposure (or master) with its calibration metadata.
///
/// Statistics are computed once at construction over pixels inside the
/// valid window `[0, saturation)`. The pixel data never changes afterwards;
/// only the two correction flags may be raised, once each.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Array2<f32>,
    kind: FrameKind,
    filter: Option<char>,
    gain: u32,
    int_time: ExposureTime,
    header: FrameHeader,
    bad_map: Option<Array2<bool>>,
    stats: FrameStats,
    dark_corrected: bool,
    flat_corrected: bool,
}

impl Frame {
    pub fn new(
        data: Array2<f32>,
        kind: FrameKind,
        filter: Option<char>,
        gain: u32,
        int_time: f64,
        header: FrameHeader,
    ) -> Result<Self> {
        Self::with_saturation(
            data,
            kind,
            filter,
            gain,
            int_time,
            header,
            DEFAULT_SATURATION_THRESHOLD,
        )
    }

    /// Like [`Frame::new`] with an explicit saturation threshold for the
    /// statistics window.
    pub fn with_saturation(
        data: Array2<f32>,
        kind: FrameKind,
        filter: Option<char>,
        gain: u32,
        int_time: f64,
        header: FrameHeader,
        saturation: f32,
    ) -> Result<Self> {
        // A frame with no pixel inside the window (fully saturated, or a
        // negative residual) still exists; it just has empty statistics.
        let stats = match compute_stats(&data.view(), None, ValidWindow::unsaturated(saturation)) {
            Ok(stats) => stats,
            Err(ReduxError::EmptyStatistics) => FrameStats::default(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            data,
            kind,
            filter: filter.map(|c| c.to_ascii_uppercase()),
            gain,
            int_time: ExposureTime::new(int_time),
            header,
            bad_map: None,
            stats,
            dark_corrected: false,
            flat_corrected: false,
        })
    }

    /// Build a master frame that inherits calibration metadata from `template`.
    /// Its statistics use the `[0, saturation)` window.
    pub fn master_from(
        template: &Frame,
        data: Array2<f32>,
        bad_map: Array2<bool>,
        saturation: f32,
    ) -> Result<Self> {
        Frame::with_saturation(
            data,
            FrameKind::Master,
            template.filter,
            template.gain,
            template.int_time.seconds(),
            template.header.clone(),
            saturation,
        )?
        .with_bad_map(bad_map)
    }

    /// Attach a good-pixel mask. Fails if its shape differs from the data.
    pub fn with_bad_map(mut self, bad_map: Array2<bool>) -> Result<Self> {
        if bad_map.dim() != self.data.dim() {
            return Err(ReduxError::ShapeMismatch {
                expected: self.data.dim(),
                found: bad_map.dim(),
            });
        }
        self.bad_map = Some(bad_map);
        Ok(self)
    }

    pub fn mark_dark_corrected(&mut self) {
        self.dark_corrected = true;
    }

    pub fn mark_flat_corrected(&mut self) {
        self.flat_corrected = true;
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn filter(&self) -> Option<char> {
        self.filter
    }

    pub fn gain(&self) -> u32 {
        self.gain
    }

    pub fn int_time(&self) -> f64 {
        self.int_time.seconds()
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn bad_map(&self) -> Option<&Array2<bool>> {
        self.bad_map.as_ref()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn dark_corrected(&self) -> bool {
        self.dark_corrected
    }

    pub fn flat_corrected(&self) -> bool {
        self.flat_corrected
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn key(&self) -> GroupKey {
        GroupKey {
            kind: self.kind,
            filter: self.filter,
            gain: self.gain,
            int_time: self.int_time,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame. Type:{}, Filter:{}, Gain:{}, IntTime:{}s",
            self.kind,
            filter_label(self.filter),
            self.gain,
            self.int_time
        )?;
        if self.dark_corrected {
            write!(f, ", Dark Applied")?;
        } else {
            write!(f, ", No Dark Applied")?;
        }
        if self.flat_corrected {
            write!(f, ", Flat Applied")
        } else {
            write!(f, ", No Flat Applied")
        }
    }
}
