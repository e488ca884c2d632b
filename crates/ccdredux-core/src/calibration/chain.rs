use std::borrow::Cow;

use ndarray::{Array2, ArrayView2, Zip};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{IndexLevel, ReduxError, Result};
use crate::frame::{filter_label, Frame, FrameKind, GroupKey};
use crate::group::FrameGroup;
use crate::pipeline::config::CalibrationConfig;
use crate::stack::sigma_clip::{accumulate, ClipKind, SigmaClipParams};
use crate::stats::{compute_stats, contains_nan, count_bad, ValidWindow};

use super::index::CalibrationIndex;
use super::mask::combine_masks;
use super::stage::{GroupFailure, GroupStage, StageTracker};

/// A master dark ready to subtract, possibly borrowed from its group's slot.
#[derive(Clone, Debug)]
pub struct MasterDark<'a> {
    pub frame: Cow<'a, Frame>,
    /// Integration time of the darks that were actually combined.
    pub source_time: f64,
    /// True when the dark came from a different integration time under `force`.
    pub degraded: bool,
}

impl MasterDark<'_> {
    pub fn bad_map(&self) -> Option<&Array2<bool>> {
        self.frame.bad_map()
    }
}

/// Bad-pixel counts of every stage that fed a calibrated light.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MaskSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_for_light: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_for_flat: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flat: Option<usize>,
    pub combined: usize,
}

/// Final product of one light group.
#[derive(Clone, Debug)]
pub struct CalibratedLight<'a> {
    pub key: GroupKey,
    /// Master light; its bad map is the combined map of every stage.
    pub master: &'a Frame,
    pub light_frames: usize,
    pub degraded: bool,
    pub masks: MaskSummary,
}

impl CalibratedLight<'_> {
    pub fn bad_map(&self) -> Option<&Array2<bool>> {
        self.master.bad_map()
    }
}

/// Runs bias/dark/flat/light calibration against a read-only index.
pub struct CalibrationChain<'a> {
    index: &'a CalibrationIndex,
    config: &'a CalibrationConfig,
    clip: &'a SigmaClipParams,
    saturation: f32,
}

impl<'a> CalibrationChain<'a> {
    pub fn new(
        index: &'a CalibrationIndex,
        config: &'a CalibrationConfig,
        clip: &'a SigmaClipParams,
        saturation: f32,
    ) -> Self {
        Self {
            index,
            config,
            clip,
            saturation,
        }
    }

    /// Fail the whole run when a required frame type is absent everywhere.
    pub fn check_preconditions(&self) -> Result<()> {
        if !self.index.contains_kind(FrameKind::Light) {
            return Err(ReduxError::IndexMiss {
                kind: FrameKind::Light,
                level: IndexLevel::Kind,
            });
        }
        if !self.config.skip_dark && !self.index.contains_kind(FrameKind::Dark) {
            return Err(ReduxError::NoDarkForGainTime {
                gain: 0,
                int_time: 0.0,
                level: IndexLevel::Kind,
            });
        }
        if !self.config.skip_flat && !self.index.contains_kind(FrameKind::Flat) {
            return Err(ReduxError::NoFlatForFilterGain {
                filter: "-".into(),
                gain: 0,
                level: IndexLevel::Kind,
            });
        }
        Ok(())
    }

    /// Resolve and accumulate the master dark for `gain` and `int_time`.
    ///
    /// An exact match is accumulated into (or read from) its group's master
    /// slot. Without one, the run fails unless `force` is set, in which case
    /// the nearest integration time at the same gain is used and, when a bias
    /// exists, its thermal signal is scaled to the requested time.
    pub fn master_dark(&self, gain: u32, int_time: f64) -> Result<MasterDark<'a>> {
        let key = GroupKey::new(FrameKind::Dark, None, gain, int_time);
        match self.index.get(&key) {
            Ok(group) => {
                let frame = self.accumulate_group(group, "dark")?;
                debug!(
                    gain,
                    int_time,
                    frames = group.len(),
                    bad_pixels = frame.bad_map().map(count_bad).unwrap_or(0),
                    "Master dark resolved"
                );
                Ok(MasterDark {
                    frame: Cow::Borrowed(frame),
                    source_time: int_time,
                    degraded: false,
                })
            }
            Err(ReduxError::IndexMiss { level, .. }) => {
                if level != IndexLevel::IntTime || !self.config.force {
                    if level == IndexLevel::IntTime {
                        info!(
                            gain,
                            int_time,
                            "No darks with equal integration time; rerun with --force to proceed degraded"
                        );
                    }
                    return Err(ReduxError::NoDarkForGainTime {
                        gain,
                        int_time,
                        level,
                    });
                }
                self.forced_dark(gain, int_time)
            }
            Err(e) => Err(e),
        }
    }

    fn forced_dark(&self, gain: u32, int_time: f64) -> Result<MasterDark<'a>> {
        let candidates = self.index.get_any_time(FrameKind::Dark, None, gain)?;
        let nearest = candidates
            .into_iter()
            .min_by(|a, b| {
                let da = (a.key().int_time.seconds() - int_time).abs();
                let db = (b.key().int_time.seconds() - int_time).abs();
                da.total_cmp(&db)
            })
            .ok_or(ReduxError::NoDarkForGainTime {
                gain,
                int_time,
                level: IndexLevel::IntTime,
            })?;
        let source_time = nearest.key().int_time.seconds();
        let dark = self.accumulate_group(nearest, "dark")?;

        let bias = if self.config.scale_dark_with_bias {
            self.index
                .get_any_time(FrameKind::Bias, None, gain)
                .ok()
                .and_then(|groups| groups.into_iter().next())
        } else {
            None
        };

        let Some(bias_group) = bias else {
            warn!(
                gain,
                requested = int_time,
                used = source_time,
                "Forcing dark with mismatched integration time; results are degraded"
            );
            return Ok(MasterDark {
                frame: Cow::Borrowed(dark),
                source_time,
                degraded: true,
            });
        };

        let bias = self.accumulate_group(bias_group, "bias")?;
        check_same_shape(dark.data(), bias.data())?;
        if source_time <= 0.0 {
            return Err(ReduxError::InvalidExposureTime(source_time));
        }
        let ratio = (int_time / source_time) as f32;
        let mut scaled = bias.data().clone();
        Zip::from(&mut scaled)
            .and(dark.data())
            .for_each(|b, &d| *b += (d - *b) * ratio);

        let mut mask = dark.bad_map().cloned().unwrap_or_else(|| Array2::from_elem(dark.shape(), true));
        if let Some(bias_mask) = bias.bad_map() {
            Zip::from(&mut mask).and(bias_mask).for_each(|m, &b| *m = *m && b);
        }
        let frame = Frame::with_saturation(
            scaled,
            FrameKind::Master,
            None,
            gain,
            int_time,
            dark.header().clone(),
            self.saturation,
        )?
        .with_bad_map(mask)?;
        ensure_no_nan(frame.data(), "scaled dark")?;

        warn!(
            gain,
            requested = int_time,
            used = source_time,
            "Scaled thermal signal of mismatched dark using master bias; results are degraded"
        );
        Ok(MasterDark {
            frame: Cow::Owned(frame),
            source_time,
            degraded: true,
        })
    }

    /// Resolve the flat group for a filter and gain (any integration time).
    pub fn resolve_flats(&self, filter: Option<char>, gain: u32) -> Result<&'a FrameGroup> {
        let groups = self
            .index
            .get_any_time(FrameKind::Flat, filter, gain)
            .map_err(|e| match e {
                ReduxError::IndexMiss { level, .. } => ReduxError::NoFlatForFilterGain {
                    filter: filter_label(filter),
                    gain,
                    level,
                },
                other => other,
            })?;
        if groups.len() > 1 {
            debug!(
                filter = %filter_label(filter),
                gain,
                count = groups.len(),
                "Several flat integration times; using the shortest"
            );
        }
        groups
            .into_iter()
            .next()
            .ok_or_else(|| ReduxError::NoFlatForFilterGain {
                filter: filter_label(filter),
                gain,
                level: IndexLevel::IntTime,
            })
    }

    /// Build (or read) the normalised master flat of `flats`, dark-corrected
    /// with `dark`.
    pub fn master_flat(&self, flats: &'a FrameGroup, dark: &MasterDark<'_>) -> Result<&'a Frame> {
        flats.master_or_try_init(|group| self.build_master_flat(group, dark))
    }

    fn build_master_flat(&self, group: &FrameGroup, dark: &MasterDark<'_>) -> Result<Frame> {
        let dark_data = dark.frame.data();
        for frame in group.frames() {
            check_same_shape(dark_data, frame.data())?;
        }

        let differences: Vec<Array2<f32>> = group
            .frames()
            .iter()
            .map(|f| f.data() - dark_data)
            .collect();
        let views: Vec<ArrayView2<f32>> = differences.iter().map(|d| d.view()).collect();
        let acc = accumulate(&views, ClipKind::Flat, self.clip)?;
        ensure_no_nan(&acc.master, "raw flat")?;

        // Normalise by the median of non-saturated, non-zero pixels only.
        let window = ValidWindow::unsaturated(self.saturation);
        let usable = acc.master.mapv(|v| v != 0.0 && window.contains(v));
        let norm = compute_stats(&acc.master.view(), Some(&usable.view()), window)?.median as f32;
        if norm == 0.0 || !norm.is_finite() {
            return Err(ReduxError::NaNInMaster {
                stage: "flat normalisation".into(),
            });
        }

        let mut clamped = 0usize;
        let normalised = acc.master.mapv(|v| {
            let n = v / norm;
            if n <= 0.0 {
                clamped += 1;
                1.0
            } else {
                n
            }
        });
        ensure_no_nan(&normalised, "flat")?;
        debug!(
            filter = %filter_label(group.key().filter),
            gain = group.key().gain,
            norm,
            clamped,
            bad_pixels = acc.bad_pixels(),
            "Master flat normalised"
        );

        let mut master = Frame::with_saturation(
            normalised,
            FrameKind::Master,
            group.key().filter,
            group.key().gain,
            group.key().int_time.seconds(),
            group.frames()[0].header().clone(),
            self.saturation,
        )?
        .with_bad_map(acc.good_mask)?;
        master.mark_dark_corrected();
        Ok(master)
    }

    /// Calibrate one light group, returning the master light or a failure
    /// that records the stage reached.
    pub fn reduce(&self, lights: &'a FrameGroup) -> std::result::Result<CalibratedLight<'a>, GroupFailure> {
        let key = lights.key();
        let mut tracker = StageTracker::new(key);
        info!(
            filter = %filter_label(key.filter),
            gain = key.gain,
            int_time = key.int_time.seconds(),
            frames = lights.len(),
            "Starting master light"
        );

        match self.reduce_tracked(lights, &mut tracker) {
            Ok(calibrated) => {
                tracker.advance(GroupStage::Done);
                Ok(calibrated)
            }
            Err(error) => Err(tracker.fail(error)),
        }
    }

    fn reduce_tracked(
        &self,
        lights: &'a FrameGroup,
        tracker: &mut StageTracker,
    ) -> Result<CalibratedLight<'a>> {
        let key = lights.key();
        let mut degraded = false;
        let mut masks = MaskSummary::default();

        // Flats, with their own dark.
        let mut flat_parts: Option<(MasterDark<'a>, &'a Frame)> = None;
        if !self.config.skip_flat {
            let flats = self.resolve_flats(key.filter, key.gain)?;
            tracker.advance(GroupStage::FlatsResolved);

            let dark_for_flat = self.master_dark(flats.key().gain, flats.key().int_time.seconds())?;
            degraded |= dark_for_flat.degraded;
            tracker.advance(GroupStage::DarksForFlatsApplied);

            let flat = self.master_flat(flats, &dark_for_flat)?;
            tracker.advance(GroupStage::FlatMasterReady);
            flat_parts = Some((dark_for_flat, flat));
        }

        let dark_for_light = if self.config.skip_dark {
            info!(group = %key, "Skipping dark correction for light frames");
            None
        } else {
            let dark = self.master_dark(key.gain, key.int_time.seconds())?;
            degraded |= dark.degraded;
            Some(dark)
        };
        tracker.advance(GroupStage::DarksForLightResolved);

        let flat_ref = flat_parts.as_ref().map(|(dark, flat)| (dark, *flat));
        let master = lights.master_or_try_init(|group| {
            self.build_master_light(group, dark_for_light.as_ref(), flat_ref)
        })?;
        tracker.advance(GroupStage::LightMasterReady);

        masks.combined = master.bad_map().map(count_bad).unwrap_or(0);
        masks.dark_for_light = dark_for_light
            .as_ref()
            .map(|d| d.bad_map().map(count_bad).unwrap_or(0));
        if let Some((dark, flat)) = &flat_parts {
            masks.dark_for_flat = Some(dark.bad_map().map(count_bad).unwrap_or(0));
            masks.flat = Some(flat.bad_map().map(count_bad).unwrap_or(0));
        }
        info!(
            group = %key,
            combined_bad = masks.combined,
            degraded,
            "Master light ready"
        );

        Ok(CalibratedLight {
            key,
            master,
            light_frames: lights.len(),
            degraded,
            masks,
        })
    }

    fn build_master_light(
        &self,
        group: &FrameGroup,
        dark: Option<&MasterDark<'_>>,
        flat: Option<(&MasterDark<'_>, &Frame)>,
    ) -> Result<Frame> {
        // Shapes are checked up front so no arithmetic runs on a mismatch.
        for frame in group.frames() {
            if let Some(d) = dark {
                check_same_shape(frame.data(), d.frame.data())?;
            }
            if let Some((_, f)) = flat {
                check_same_shape(frame.data(), f.data())?;
            }
        }

        let quotients: Vec<Array2<f32>> = group
            .frames()
            .iter()
            .map(|light| {
                let mut q = light.data().clone();
                if let Some(d) = dark {
                    q -= d.frame.data();
                }
                if let Some((_, f)) = flat {
                    q /= f.data();
                }
                q
            })
            .collect();
        let views: Vec<ArrayView2<f32>> = quotients.iter().map(|q| q.view()).collect();
        let acc = accumulate(&views, ClipKind::Light, self.clip)?;
        ensure_no_nan(&acc.master, "light")?;

        let mut stage_masks: Vec<&Array2<bool>> = vec![&acc.good_mask];
        if let Some(m) = dark.and_then(|d| d.bad_map()) {
            stage_masks.push(m);
        }
        if let Some((flat_dark, f)) = flat {
            if let Some(m) = flat_dark.bad_map() {
                stage_masks.push(m);
            }
            if let Some(m) = f.bad_map() {
                stage_masks.push(m);
            }
        }
        let combined = combine_masks(&stage_masks, self.config.mask_combination)?;
        debug!(
            group = %group.key(),
            light_bad = acc.bad_pixels(),
            stages = stage_masks.len(),
            combined_bad = count_bad(&combined),
            rule = %self.config.mask_combination,
            "Combined bad-pixel map"
        );

        let template = &group.frames()[0];
        let mut master = Frame::with_saturation(
            acc.master,
            FrameKind::Master,
            template.filter(),
            template.gain(),
            template.int_time(),
            template.header().clone(),
            self.saturation,
        )?
        .with_bad_map(combined)?;
        if dark.is_some() {
            master.mark_dark_corrected();
        }
        if flat.is_some() {
            master.mark_flat_corrected();
        }
        Ok(master)
    }

    fn accumulate_group(&self, group: &'a FrameGroup, stage: &str) -> Result<&'a Frame> {
        let frame = group.accumulate(self.clip, self.saturation)?;
        ensure_no_nan(frame.data(), stage)?;
        Ok(frame)
    }
}

fn check_same_shape(expected: &Array2<f32>, found: &Array2<f32>) -> Result<()> {
    if expected.dim() != found.dim() {
        return Err(ReduxError::ShapeMismatch {
            expected: expected.dim(),
            found: found.dim(),
        });
    }
    Ok(())
}

fn ensure_no_nan(data: &Array2<f32>, stage: &str) -> Result<()> {
    if contains_nan(data) {
        return Err(ReduxError::NaNInMaster {
            stage: stage.to_string(),
        });
    }
    Ok(())
}
