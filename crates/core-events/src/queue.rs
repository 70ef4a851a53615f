//! Priority event queue feeding the frame engine.
//!
//! Three scheduling classes with strict precedence (`high` > `normal` > `low`)
//! and FIFO order within a class. The queue is unbounded: backpressure is the
//! responsibility of afferent sources (the bounded feed channel in
//! [`crate::source`]), not of the kernel loop.

use std::collections::VecDeque;

use crate::{Event, EventPriority};

#[derive(Debug, Default)]
pub struct PriorityEventQueue {
    high: VecDeque<Event>,
    normal: VecDeque<Event>,
    low: VecDeque<Event>,
    pushed_total: u64,
    shifted_total: u64,
}

/// Point-in-time queue statistics surfaced by `debug_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDebugInfo {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub pushed_total: u64,
    pub shifted_total: u64,
}

impl PriorityEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        tracing::trace!(
            target: "space.queue",
            topic = event.topic.as_str(),
            priority = ?event.priority,
            "queue_push"
        );
        self.pushed_total += 1;
        match event.priority {
            EventPriority::High => self.high.push_back(event),
            EventPriority::Normal => self.normal.push_back(event),
            EventPriority::Low => self.low.push_back(event),
        }
    }

    /// Pop the next event in priority order, FIFO within a class.
    pub fn shift(&mut self) -> Option<Event> {
        let next = self
            .high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front());
        if next.is_some() {
            self.shifted_total += 1;
        }
        next
    }

    /// Drain every queued event in scheduling order. Used by the frame engine
    /// at setup; events pushed during the frame land in the next drain.
    pub fn drain_all(&mut self) -> Vec<Event> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(ev) = self.shift() {
            out.push(ev);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty() && self.low.is_empty()
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn debug_info(&self) -> QueueDebugInfo {
        QueueDebugInfo {
            high: self.high.len(),
            normal: self.normal.len(),
            low: self.low.len(),
            pushed_total: self.pushed_total,
            shifted_total: self.shifted_total,
        }
    }
}
