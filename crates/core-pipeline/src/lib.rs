//! RETM processor contracts: the typed seams through which components
//! participate in a frame.
//!
//! Four phases, four roles:
//! - **Receptor** (phase 1): events in, deltas out. Synchronous, so every
//!   receptor in a phase sees the identical state snapshot.
//! - **Transform** (phase 2): state in, deltas out, run in a fixed-point
//!   loop. Synchronous and required to be idempotent over a fixed state —
//!   a transform that keeps emitting deltas for unchanged state will hit
//!   the engine's iteration bound.
//! - **Effector** (phase 3): facet changes in, events and external actions
//!   out. Async; this is where outbound I/O lives.
//! - **Maintainer** (phase 4): whole frame plus changes in, events out.
//!   Async; durable bookkeeping (persistence, tree materialization).
//!
//! A fifth role, **Modulator**, gates event admission before phase 1. It is
//! probed and registered like the others but the kernel currently ships no
//! built-in modulators.
//!
//! Every role receives a read-only `&VeilState`; world changes flow back
//! only as returned deltas (receptors/transforms) or as events for the next
//! frame (effectors/maintainers).

use async_trait::async_trait;

use core_events::Event;
use core_veil::{FacetChange, Frame, VeilDelta, VeilState};

pub mod filter;

pub use filter::{FacetFilter, filter_changes};

/// Phase-1 processor: turns events on subscribed topics into deltas.
pub trait Receptor {
    /// Topic patterns this receptor consumes (subscription grammar of
    /// `core_events::topic_matches`).
    fn topics(&self) -> Vec<String>;

    fn transform(&mut self, event: &Event, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>>;
}

/// Phase-2 processor: derives deltas from the current state. Must be
/// idempotent: once its effect is present, it returns an empty batch.
pub trait Transform {
    fn process(&mut self, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>>;
}

/// Admission decision of a modulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Drop,
}

/// Pre-phase-1 gate: may throttle or drop incoming events.
pub trait Modulator {
    fn admit(&mut self, event: &Event, state: &VeilState) -> Admission;
}

/// Outbound side effect performed by an effector, reported for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalAction {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl ExternalAction {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// What an effector hands back to the engine.
#[derive(Debug, Default)]
pub struct EffectorOutput {
    /// Queued for the next frame.
    pub events: Vec<Event>,
    /// Side effects already performed, recorded for the frame summary.
    pub external_actions: Vec<ExternalAction>,
}

impl EffectorOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_external_action(mut self, action: ExternalAction) -> Self {
        self.external_actions.push(action);
        self
    }
}

/// What a maintainer hands back to the engine.
#[derive(Debug, Default)]
pub struct MaintainerOutput {
    /// Queued for the next frame.
    pub events: Vec<Event>,
    /// Applied as a trailing batch after the maintainer phase; the resulting
    /// facet changes surface to effectors in the next frame, preserving
    /// exactly-once visibility.
    pub deltas: Vec<VeilDelta>,
}

impl MaintainerOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_delta(mut self, delta: VeilDelta) -> Self {
        self.deltas.push(delta);
        self
    }
}

/// Phase-3 processor: observes the frame's facet changes (filtered by its
/// declared facet filters) and performs outbound I/O.
#[async_trait(?Send)]
pub trait Effector {
    /// Filters selecting which changes this effector observes. An empty
    /// list means match-all.
    fn facet_filters(&self) -> Vec<FacetFilter>;

    async fn process(
        &mut self,
        changes: &[FacetChange],
        state: &VeilState,
    ) -> anyhow::Result<EffectorOutput>;
}

/// Phase-4 processor: sees the complete frame and its merged change log;
/// home of durable bookkeeping.
#[async_trait(?Send)]
pub trait Maintainer {
    async fn process(
        &mut self,
        frame: &Frame,
        changes: &[FacetChange],
        state: &VeilState,
    ) -> anyhow::Result<MaintainerOutput>;
}
