// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch buffer of the ordered-stream writer.
//!
//! The buffer is owned by a single control loop, so it carries no locking.
//! Its size accounting follows the service's payload rule: every record costs
//! its message length plus [`constants::RECORD_OVERHEAD_BYTES`].

use std::collections::VecDeque;

use crate::constants;
use crate::event::LogEvent;

/// Accumulates log events until the writer flushes them.
#[derive(Debug, Clone)]
pub struct Batch {
    events: VecDeque<LogEvent>,
    size: usize,
    max_bytes: usize,
    max_count: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Batch::new(constants::MAX_BATCH_BYTES, constants::MAX_BATCH_COUNT)
    }
}

impl Batch {
    #[must_use]
    pub fn new(max_bytes: usize, max_count: usize) -> Self {
        Batch {
            events: VecDeque::new(),
            size: 0,
            max_bytes,
            max_count,
        }
    }

    /// Bytes an event is accounted for.
    #[must_use]
    pub fn record_size(event: &LogEvent) -> usize {
        event.len() + constants::RECORD_OVERHEAD_BYTES
    }

    /// Appends an event. Never refuses: the caller decides when to flush.
    pub fn add(&mut self, event: LogEvent) {
        self.size += Self::record_size(&event);
        self.events.push_back(event);
    }

    /// True once either limit is reached. Both bounds are inclusive.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.size >= self.max_bytes || self.events.len() >= self.max_count
    }

    /// Takes every buffered event in insertion order along with their
    /// accounted size, leaving the batch empty.
    pub fn drain(&mut self) -> (Vec<LogEvent>, usize) {
        let size = std::mem::take(&mut self.size);
        (std::mem::take(&mut self.events).into(), size)
    }

    /// Takes the oldest events that fit in one append: at most `max_count`
    /// events, and events are taken while the total stays under `max_bytes`,
    /// so the last one may overshoot it like in [`add`](Self::add). A
    /// backlog larger than one batch stays buffered.
    pub fn drain_ready(&mut self) -> (Vec<LogEvent>, usize) {
        let mut taken = Vec::new();
        let mut size = 0;
        while taken.len() < self.max_count.max(1) && size < self.max_bytes {
            let Some(event) = self.events.pop_front() else {
                break;
            };
            size += Self::record_size(&event);
            taken.push(event);
        }
        self.size -= size;
        (taken, size)
    }

    /// Puts a drained batch back ahead of anything buffered since.
    pub fn requeue(&mut self, events: Vec<LogEvent>) {
        for event in events.into_iter().rev() {
            self.size += Self::record_size(&event);
            self.events.push_front(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}
