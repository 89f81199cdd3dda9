//! Bounded log of applied transitions, exportable as JSON for live inspection.

use crate::active_clip::{Transition, TransitionKind};
use crate::ids::{ClipHandle, ReplacementId, SubjectId};
use crate::replacement::TransitionTrigger;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic sequence number, never reused after eviction.
    pub seq: u64,
    pub clip: ClipHandle,
    pub subject: SubjectId,
    pub original_slot: u16,
    pub trigger: TransitionTrigger,
    pub kind: TransitionKind,
    pub from: Option<ReplacementId>,
    pub to: Option<ReplacementId>,
    pub binding_index: u16,
    pub variant: Option<usize>,
    pub blend_time: f32,
}

#[derive(Debug, Default)]
pub struct ReplacementHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_seq: u64,
}

impl ReplacementHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrinking drops the oldest entries first.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    pub fn record(
        &mut self,
        clip: ClipHandle,
        subject: SubjectId,
        original_slot: u16,
        transition: &Transition,
    ) {
        if self.capacity == 0 {
            return;
        }
        let entry = HistoryEntry {
            seq: self.next_seq,
            clip,
            subject,
            original_slot,
            trigger: transition.trigger,
            kind: transition.kind,
            from: transition.from,
            to: transition.to,
            binding_index: transition.binding_index,
            variant: transition.variant,
            blend_time: transition.blend_time,
        };
        self.next_seq += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let entries: Vec<&HistoryEntry> = self.entries.iter().collect();
        serde_json::to_string(&entries)
    }
}
