use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::models::common::MAX_TIMELINE_LEN;
use crate::models::events::NormalizedEvent;

/// Bounded display buffer of normalized events, newest first.
///
/// Entries past the capacity are dropped from the tail. This is a view over the live stream,
/// not a log, so nothing evicted is ever recovered.
#[derive(Debug, Clone)]
pub struct Timeline {
    entries: VecDeque<NormalizedEvent>,
    capacity: usize,
}

/// Counts from merging one batch into a [`Timeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub received: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub evicted: usize,
}

impl Timeline {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head(&self) -> Option<&NormalizedEvent> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NormalizedEvent> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<NormalizedEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Prepends the events of `batch` (wire order, oldest first) that are strictly newer than
    /// the current head, then truncates to capacity. Returns `(inserted, evicted)`.
    pub(crate) fn merge_batch(&mut self, batch: Vec<NormalizedEvent>) -> (usize, usize) {
        let head_time: Option<DateTime<Utc>> = self.head().map(|e| e.occurred_at);

        // Newest first, keeping only what the head hasn't already covered
        let fresh: Vec<NormalizedEvent> = batch
            .into_iter()
            .rev()
            .filter(|event| head_time.is_none_or(|head| event.occurred_at > head))
            .collect();

        let inserted = fresh.len();
        for event in fresh.into_iter().rev() {
            self.entries.push_front(event);
        }

        let evicted = self.entries.len().saturating_sub(self.capacity);
        self.entries.truncate(self.capacity);

        (inserted, evicted)
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(MAX_TIMELINE_LEN)
    }
}
