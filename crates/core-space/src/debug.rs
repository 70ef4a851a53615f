//! The debug observer port.
//!
//! A pull-free push surface: consumers (the debug HTTP/WS server, test
//! probes, a tracing bridge) register an observer and receive notifications
//! about frame starts, event deliveries, frame completions, outgoing
//! frames, and rendered contexts. Observers get borrowed views and must
//! return quickly; they cannot influence the frame.

use std::collections::VecDeque;
use std::time::Duration;

use ahash::AHashMap;
use core_events::Event;
use core_veil::Frame;
use serde_json::Value;

/// Ambient identity of the space notifying an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext<'a> {
    pub space_id: &'a str,
    pub lifecycle_id: u64,
}

/// Completion summary delivered with `on_frame_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCompletion {
    pub duration: Duration,
    pub processed_events: usize,
}

/// A prompt rendered for an agent during a frame, retained for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedContextInfo {
    pub sequence: u64,
    pub rendered: String,
    pub meta: Value,
    pub timestamp: String,
}

#[allow(unused_variables)]
pub trait DebugObserver {
    fn on_frame_start(&self, frame: &Frame, ctx: &FrameContext) {}
    fn on_frame_event(&self, frame: &Frame, event: &Event, ctx: &FrameContext) {}
    fn on_frame_complete(&self, frame: &Frame, completion: &FrameCompletion, ctx: &FrameContext) {}
    fn on_outgoing_frame(&self, frame: &Frame, ctx: &FrameContext) {}
    fn on_rendered_context(&self, info: &RenderedContextInfo) {}
}

/// Bounded LRU of rendered contexts keyed by frame sequence. Re-recording a
/// sequence refreshes its recency.
pub struct RenderedContextLog {
    cap: usize,
    entries: AHashMap<u64, RenderedContextInfo>,
    order: VecDeque<u64>,
}

impl RenderedContextLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: AHashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn record(&mut self, info: RenderedContextInfo) {
        let sequence = info.sequence;
        if self.entries.insert(sequence, info).is_some() {
            self.order.retain(|s| *s != sequence);
        }
        self.order.push_back(sequence);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn get(&self, sequence: u64) -> Option<&RenderedContextInfo> {
        self.entries.get(&sequence)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sequences from least to most recently recorded.
    pub fn sequences(&self) -> impl Iterator<Item = u64> + '_ {
        self.order.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(sequence: u64) -> RenderedContextInfo {
        RenderedContextInfo {
            sequence,
            rendered: format!("prompt-{sequence}"),
            meta: Value::Null,
            timestamp: core_veil::iso_timestamp(),
        }
    }

    #[test]
    fn lru_evicts_oldest_beyond_capacity() {
        let mut log = RenderedContextLog::new(3);
        for s in 1..=5 {
            log.record(info(s));
        }
        assert_eq!(log.len(), 3);
        assert!(log.get(1).is_none());
        assert!(log.get(2).is_none());
        assert!(log.get(3).is_some());
        assert_eq!(log.sequences().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn rerecording_refreshes_recency() {
        let mut log = RenderedContextLog::new(2);
        log.record(info(1));
        log.record(info(2));
        log.record(info(1)); // refresh
        log.record(info(3)); // evicts 2, not 1
        assert!(log.get(1).is_some());
        assert!(log.get(2).is_none());
        assert!(log.get(3).is_some());
    }
}
