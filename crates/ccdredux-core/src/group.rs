use std::fmt;
use std::sync::OnceLock;

use ndarray::ArrayView2;

use crate::error::{ReduxError, Result};
use crate::frame::{Frame, FrameKind, GroupKey};
use crate::stack::sigma_clip::{accumulate, ClipKind, SigmaClipParams};

/// Ordered collection of frames sharing `(type, filter, gain, intTime, shape)`.
///
/// A group owns at most one derived master frame. The master slot is a
/// write-once cell: concurrent readers may race to fill it, but only one
/// value is ever stored. [`FrameGroup::recompute`] replaces it as a whole.
#[derive(Debug)]
pub struct FrameGroup {
    key: GroupKey,
    shape: (usize, usize),
    frames: Vec<Frame>,
    master: OnceLock<Frame>,
}

impl FrameGroup {
    pub fn new(frame: Frame) -> Self {
        Self {
            key: frame.key(),
            shape: frame.shape(),
            frames: vec![frame],
            master: OnceLock::new(),
        }
    }

    /// Append a frame, failing with [`ReduxError::GroupMismatch`] naming every
    /// field that disagrees with the group.
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        let mut fields = Vec::new();
        if frame.kind() != self.key.kind {
            fields.push("type");
        }
        if frame.filter() != self.key.filter {
            fields.push("filter");
        }
        if frame.gain() != self.key.gain {
            fields.push("gain");
        }
        if frame.key().int_time != self.key.int_time {
            fields.push("integration time");
        }
        if frame.shape() != self.shape {
            fields.push("shape");
        }
        if !fields.is_empty() {
            return Err(ReduxError::GroupMismatch { fields });
        }
        if self.master.get().is_some() {
            return Err(ReduxError::MasterAlreadySet);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn key(&self) -> GroupKey {
        self.key
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Pixel views of every member, in insertion order.
    pub fn planes(&self) -> Vec<ArrayView2<'_, f32>> {
        self.frames.iter().map(|f| f.data().view()).collect()
    }

    pub fn master(&self) -> Option<&Frame> {
        self.master.get()
    }

    /// Store a master computed elsewhere. Fails if one is already stored.
    pub fn set_master(&self, frame: Frame) -> Result<&Frame> {
        self.master
            .set(frame)
            .map_err(|_| ReduxError::MasterAlreadySet)?;
        self.master.get().ok_or(ReduxError::MasterAlreadySet)
    }

    /// Return the stored master, computing it with `build` on first use.
    pub fn master_or_try_init<F>(&self, build: F) -> Result<&Frame>
    where
        F: FnOnce(&FrameGroup) -> Result<Frame>,
    {
        if let Some(master) = self.master.get() {
            return Ok(master);
        }
        let frame = build(self)?;
        Ok(self.master.get_or_init(|| frame))
    }

    /// Sigma-clip the raw members into the master slot.
    ///
    /// Darks and biases clip per frame, flats per frame, lights per pixel.
    pub fn accumulate(&self, params: &SigmaClipParams, saturation: f32) -> Result<&Frame> {
        self.master_or_try_init(|group| group.accumulate_raw(params, saturation))
    }

    /// Replace the stored master. The new master is fully built before the
    /// old one is dropped, so a failed rebuild leaves the slot untouched.
    pub fn recompute<F>(&mut self, build: F) -> Result<&Frame>
    where
        F: FnOnce(&FrameGroup) -> Result<Frame>,
    {
        let frame = build(self)?;
        self.master = OnceLock::from(frame);
        self.master.get().ok_or(ReduxError::MasterAlreadySet)
    }

    /// Sigma-clip the raw members without touching the master slot.
    pub fn accumulate_raw(&self, params: &SigmaClipParams, saturation: f32) -> Result<Frame> {
        let kind = match self.key.kind {
            FrameKind::Flat => ClipKind::Flat,
            FrameKind::Light => ClipKind::Light,
            FrameKind::Bias | FrameKind::Dark | FrameKind::Master => ClipKind::Dark,
        };
        let acc = accumulate(&self.planes(), kind, params)?;
        Frame::master_from(&self.frames[0], acc.master, acc.good_mask, saturation)
    }
}

impl fmt::Display for FrameGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.master.get() {
            Some(master) => write!(f, "FrameGroup. {}x({})", self.frames.len(), master),
            None => write!(f, "FrameGroup. {}x({})", self.frames.len(), self.frames[0]),
        }
    }
}
