//! Frame engine counters.
//!
//! Plain fields, not atomics: the engine is single-threaded and the metrics
//! are owned by the Space. `snapshot()` is the read surface for tests and
//! the debug port.

#[derive(Debug, Default)]
pub struct FrameMetrics {
    frames_processed: u64,
    events_processed: u64,
    phase2_iterations: u64,
    divergence_warnings: u64,
    processor_faults: u64,
    state_faults: u64,
    reentrant_rejections: u64,
    outgoing_frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetricsSnapshot {
    pub frames_processed: u64,
    pub events_processed: u64,
    pub phase2_iterations: u64,
    pub divergence_warnings: u64,
    pub processor_faults: u64,
    pub state_faults: u64,
    pub reentrant_rejections: u64,
    pub outgoing_frames: u64,
}

impl FrameMetrics {
    pub fn snapshot(&self) -> FrameMetricsSnapshot {
        FrameMetricsSnapshot {
            frames_processed: self.frames_processed,
            events_processed: self.events_processed,
            phase2_iterations: self.phase2_iterations,
            divergence_warnings: self.divergence_warnings,
            processor_faults: self.processor_faults,
            state_faults: self.state_faults,
            reentrant_rejections: self.reentrant_rejections,
            outgoing_frames: self.outgoing_frames,
        }
    }

    pub fn frame_processed(&mut self, events: usize, phase2_iterations: usize) {
        self.frames_processed += 1;
        self.events_processed += events as u64;
        self.phase2_iterations += phase2_iterations as u64;
    }

    pub fn divergence_warning(&mut self) {
        self.divergence_warnings += 1;
    }

    pub fn processor_fault(&mut self) {
        self.processor_faults += 1;
    }

    pub fn state_fault(&mut self) {
        self.state_faults += 1;
    }

    pub fn reentrant_rejection(&mut self) {
        self.reentrant_rejections += 1;
    }

    pub fn outgoing_frame(&mut self) {
        self.outgoing_frames += 1;
    }
}
