use std::collections::BTreeMap;

use crate::error::{IndexLevel, ReduxError, Result};
use crate::frame::{filter_label, Frame, FrameKind, GroupKey};
use crate::group::FrameGroup;

/// Every ingested frame, grouped by `(type, filter, gain, intTime)`.
///
/// Populated once during ingestion and read-only during reduction. Keys are
/// kept in a single ordered map; a failed lookup reports the first level of
/// the key (type, then filter, gain, integration time) that has no match.
#[derive(Debug, Default)]
pub struct CalibrationIndex {
    groups: BTreeMap<GroupKey, FrameGroup>,
}

impl CalibrationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the group for `frame`'s key and append the frame.
    pub fn upsert(&mut self, frame: Frame) -> Result<&FrameGroup> {
        let key = frame.key();
        let group = match self.groups.entry(key) {
            std::collections::btree_map::Entry::Occupied(entry) => {
                let group = entry.into_mut();
                group.push(frame)?;
                group
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(FrameGroup::new(frame))
            }
        };
        Ok(group)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.groups.values().map(FrameGroup::len).sum()
    }

    pub fn contains_kind(&self, kind: FrameKind) -> bool {
        self.groups.keys().any(|k| k.kind == kind)
    }

    pub fn groups(&self) -> impl Iterator<Item = &FrameGroup> {
        self.groups.values()
    }

    /// Groups of one frame type, in key order.
    pub fn groups_of(&self, kind: FrameKind) -> impl Iterator<Item = &FrameGroup> {
        self.groups.values().filter(move |g| g.key().kind == kind)
    }

    pub fn get_mut(&mut self, key: &GroupKey) -> Option<&mut FrameGroup> {
        self.groups.get_mut(key)
    }

    /// Exact lookup of one group.
    pub fn get(&self, key: &GroupKey) -> Result<&FrameGroup> {
        self.groups.get(key).ok_or_else(|| ReduxError::IndexMiss {
            kind: key.kind,
            level: self.miss_level(key),
        })
    }

    /// All groups matching `(kind, filter, gain)` at any integration time,
    /// ordered by integration time.
    pub fn get_any_time(
        &self,
        kind: FrameKind,
        filter: Option<char>,
        gain: u32,
    ) -> Result<Vec<&FrameGroup>> {
        let matches: Vec<&FrameGroup> = self
            .groups
            .iter()
            .filter(|(k, _)| k.kind == kind && k.filter == filter && k.gain == gain)
            .map(|(_, g)| g)
            .collect();
        if matches.is_empty() {
            // Any integration time would do, so the miss is at gain or above.
            let any_time = GroupKey::new(kind, filter, gain, 0.0);
            let level = match self.miss_level(&any_time) {
                IndexLevel::IntTime => IndexLevel::Gain,
                level => level,
            };
            return Err(ReduxError::IndexMiss { kind, level });
        }
        Ok(matches)
    }

    /// First level of `key` without a matching entry.
    pub fn miss_level(&self, key: &GroupKey) -> IndexLevel {
        let mut level = IndexLevel::Kind;
        for k in self.groups.keys() {
            if k.kind != key.kind {
                continue;
            }
            level = deeper(level, IndexLevel::Filter);
            if k.filter != key.filter {
                continue;
            }
            level = deeper(level, IndexLevel::Gain);
            if k.gain != key.gain {
                continue;
            }
            return IndexLevel::IntTime;
        }
        level
    }

    /// One line per group, for diagnostics.
    pub fn describe(&self) -> Vec<String> {
        self.groups
            .iter()
            .map(|(k, g)| {
                format!(
                    "{:<6} filter {:<2} gain {:<5} {:>8}s  {:>4} frame(s)  {}x{}",
                    k.kind,
                    filter_label(k.filter),
                    k.gain,
                    k.int_time,
                    g.len(),
                    g.shape().1,
                    g.shape().0
                )
            })
            .collect()
    }
}

fn deeper(a: IndexLevel, b: IndexLevel) -> IndexLevel {
    fn depth(l: IndexLevel) -> u8 {
        match l {
            IndexLevel::Kind => 0,
            IndexLevel::Filter => 1,
            IndexLevel::Gain => 2,
            IndexLevel::IntTime => 3,
        }
    }
    if depth(b) > depth(a) {
        b
    } else {
        a
    }
}
