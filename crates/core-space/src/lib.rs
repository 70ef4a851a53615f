//! The Space: root element, event scheduler, and frame engine.
//!
//! A Space owns every process-wide structure of the kernel — the VEIL store,
//! the priority queue, the element tree, the reference registry, the RETM
//! role registrations, the debug observer list, and (when enabled) the
//! persistence maintainer — as explicitly-passed handles; there are no
//! ambient globals.
//!
//! One `process_frame` call is one atomic advancement of the world:
//!
//! ```text
//! queued events
//!   → phase 1: receptors (events → deltas), one application
//!   → phase 2: transforms to fixed point (≤ 10 iterations), ephemeral
//!     cleanup last in every iteration
//!   → phase 3: effectors observe the merged change log, emit events
//!   → phase 4: element-tree maintainer, component maintainers,
//!     persistence — emit events and trailing deltas
//!   → commit, observers notified, frame:end through the tree
//! ```
//!
//! The kernel is single-threaded and cooperative: exactly one frame runs at
//! a time, reentrant `process_frame` calls are no-ops, and every processor
//! in a phase iteration sees the same state snapshot.

pub mod builtins;
pub mod debug;
pub mod engine;
pub mod handles;
pub mod metrics;
pub mod persistence;
pub mod restore;
pub mod runner;
pub mod space;
pub mod tree_maintainer;

pub use debug::{DebugObserver, FrameCompletion, FrameContext, RenderedContextInfo};
pub use handles::{SpaceHandle, VeilStateHandle};
pub use metrics::FrameMetricsSnapshot;
pub use persistence::PersistenceMaintainer;
pub use restore::{RestoreReport, restore_space};
pub use space::{FrameSummary, ProcessorRef, Space};

/// Phase-2 fixed-point iteration bound.
pub const MAX_PHASE2_ITERATIONS: usize = 10;

/// Capacity of the rendered-context LRU.
pub const RENDERED_CONTEXT_CAP: usize = 200;
