//! The VEIL state store.
//!
//! Mutation contract:
//! - a delta batch validates first and applies second, so a rejected batch
//!   leaves the facet map untouched;
//! - `addFacet` with a live id is a fault, `changeState`/`rewriteFacet` on an
//!   absent id is a fault, `removeFacet` on an absent id is tolerated;
//! - the change log of a batch is coalesced per facet (first-touch order,
//!   net before/after snapshots), and is the sole input to the effector and
//!   maintainer phases of the frame that produced it;
//! - frame history is append-only and gap-free except through the explicit
//!   `delete_recent_frames` recovery operation.
//!
//! Sequence allocation: one sequence per processed frame. The engine
//! allocates via `next_sequence` at frame setup, applies phase batches with
//! `apply_deltas` under that sequence, and appends the finished frame with
//! `commit_frame`. Replay and outgoing frames use `apply_frame` /
//! `record_outgoing_frame`, which do both steps at once.
//!
//! Facets, streams, and agents live in ordered maps so serialized state is
//! deterministic — replay equality is checked bytewise by the test suite.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delta::{FacetChange, VeilDelta};
use crate::error::VeilError;
use crate::facet::Facet;
use crate::frame::{Frame, StreamRef};
use crate::stream::{AgentInfo, Stream};

/// Push listener invoked after every committed frame. Used by the debug
/// surface; listeners get borrowed views and must not re-enter the store.
pub type StateListener = Rc<dyn Fn(&Frame, &[FacetChange])>;

#[derive(Default)]
pub struct VeilState {
    facets: BTreeMap<String, Facet>,
    streams: BTreeMap<String, Stream>,
    agents: BTreeMap<String, AgentInfo>,
    current_agent: Option<String>,
    scopes: BTreeSet<String>,
    frame_history: Vec<Frame>,
    current_sequence: u64,
    /// Tombstones: ids that have been removed at least once. Re-adding a
    /// tombstoned id is legal.
    removals: BTreeSet<String>,
    /// Sequence at which each live ephemeral facet first landed; consumed by
    /// the cleanup transform.
    ephemeral_first_seen: AHashMap<String, u64>,
    listeners: Vec<StateListener>,
}

/// Serialized form of the store, embedded in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VeilStateSnapshot {
    pub facets: Vec<Facet>,
    pub streams: Vec<Stream>,
    pub agents: Vec<AgentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    pub frame_history: Vec<Frame>,
    pub current_sequence: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removals: Vec<String>,
}

impl VeilState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- sequence -------------------------------------------------------

    /// Atomic pre-increment: allocates and returns the next sequence.
    pub fn next_sequence(&mut self) -> u64 {
        self.current_sequence += 1;
        self.current_sequence
    }

    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    // ---- facet reads ----------------------------------------------------

    pub fn facet(&self, id: &str) -> Option<&Facet> {
        self.facets.get(id)
    }

    pub fn has_facet(&self, id: &str) -> bool {
        self.facets.contains_key(id)
    }

    pub fn facets(&self) -> impl Iterator<Item = &Facet> {
        self.facets.values()
    }

    pub fn facet_count(&self) -> usize {
        self.facets.len()
    }

    pub fn facets_of_type<'a>(&'a self, facet_type: &'a str) -> impl Iterator<Item = &'a Facet> {
        self.facets
            .values()
            .filter(move |f| f.facet_type == facet_type)
    }

    pub fn was_removed(&self, id: &str) -> bool {
        self.removals.contains(id)
    }

    /// Ids of live ephemeral facets that first landed strictly before
    /// `sequence` — i.e. facets that have already had one effector-visible
    /// frame and are due for cleanup.
    pub fn expired_ephemerals(&self, sequence: u64) -> Vec<String> {
        let mut ids: Vec<String> = self
            .ephemeral_first_seen
            .iter()
            .filter(|&(_, &seen)| seen < sequence)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ---- streams / agents / scopes --------------------------------------

    pub fn register_stream(&mut self, stream: Stream) {
        self.streams.insert(stream.id.clone(), stream);
    }

    pub fn stream(&self, id: &str) -> Option<&Stream> {
        self.streams.get(id)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn register_agent(&mut self, agent: AgentInfo) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn agent(&self, id: &str) -> Option<&AgentInfo> {
        self.agents.get(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentInfo> {
        self.agents.values()
    }

    pub fn set_current_agent(&mut self, id: Option<String>) {
        self.current_agent = id;
    }

    pub fn current_agent(&self) -> Option<&AgentInfo> {
        self.current_agent
            .as_deref()
            .and_then(|id| self.agents.get(id))
    }

    pub fn add_scope(&mut self, scope: impl Into<String>) {
        self.scopes.insert(scope.into());
    }

    pub fn scopes(&self) -> impl Iterator<Item = &String> {
        self.scopes.iter()
    }

    // ---- history --------------------------------------------------------

    pub fn frame_history(&self) -> &[Frame] {
        &self.frame_history
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frame_history.last()
    }

    // ---- mutation -------------------------------------------------------

    /// Apply a delta batch under `sequence` without touching frame history.
    /// Validates the whole batch first; on any fault the store is unchanged.
    pub fn apply_deltas(
        &mut self,
        deltas: &[VeilDelta],
        sequence: u64,
    ) -> Result<Vec<FacetChange>, VeilError> {
        if deltas.is_empty() {
            return Ok(Vec::new());
        }
        // Stage every touched facet in a working overlay; commit only on
        // full success. `None` in the overlay means "removed by this batch".
        let mut working: AHashMap<String, Option<Facet>> = AHashMap::new();
        let mut touch_order: Vec<String> = Vec::new();

        let presence = |working: &AHashMap<String, Option<Facet>>, id: &str| -> bool {
            match working.get(id) {
                Some(slot) => slot.is_some(),
                None => self.facets.contains_key(id),
            }
        };

        for delta in deltas {
            let id = delta.facet_id().to_string();
            match delta {
                VeilDelta::AddFacet { facet } => {
                    if presence(&working, &id) {
                        return Err(VeilError::DuplicateFacet { id, sequence });
                    }
                    if !working.contains_key(&id) {
                        touch_order.push(id.clone());
                    }
                    working.insert(id, Some(facet.clone()));
                }
                VeilDelta::ChangeState { id: _, state } => {
                    if !presence(&working, &id) {
                        return Err(VeilError::AbsentFacet {
                            op: "changeState",
                            id,
                        });
                    }
                    let Some(patch) = state.as_object() else {
                        return Err(VeilError::InvalidStateMerge {
                            id,
                            reason: "partial state must be a JSON object".into(),
                        });
                    };
                    let mut facet = match working.get(&id) {
                        Some(slot) => slot.clone().expect("presence checked"),
                        None => self.facets[&id].clone(),
                    };
                    match facet.state.take() {
                        None => {
                            facet.state = Some(Value::Object(patch.clone()));
                        }
                        Some(Value::Object(mut existing)) => {
                            for (k, v) in patch {
                                existing.insert(k.clone(), v.clone());
                            }
                            facet.state = Some(Value::Object(existing));
                        }
                        Some(other) => {
                            return Err(VeilError::InvalidStateMerge {
                                id,
                                reason: format!(
                                    "existing state is not an object (found {})",
                                    type_name_of(&other)
                                ),
                            });
                        }
                    }
                    if !working.contains_key(&id) {
                        touch_order.push(id.clone());
                    }
                    working.insert(id, Some(facet));
                }
                VeilDelta::RewriteFacet {
                    id: _,
                    content,
                    state,
                    aspects,
                    ephemeral,
                } => {
                    if !presence(&working, &id) {
                        return Err(VeilError::AbsentFacet {
                            op: "rewriteFacet",
                            id,
                        });
                    }
                    let mut facet = match working.get(&id) {
                        Some(slot) => slot.clone().expect("presence checked"),
                        None => self.facets[&id].clone(),
                    };
                    if let Some(content) = content {
                        facet.content = Some(content.clone());
                    }
                    if let Some(state) = state {
                        facet.state = Some(state.clone());
                    }
                    if let Some(patch) = aspects {
                        facet.aspects.overlay(patch);
                    }
                    if let Some(ephemeral) = ephemeral {
                        facet.ephemeral = *ephemeral;
                    }
                    if !working.contains_key(&id) {
                        touch_order.push(id.clone());
                    }
                    working.insert(id, Some(facet));
                }
                VeilDelta::RemoveFacet { id: _ } => {
                    if !presence(&working, &id) {
                        // Tolerated: removal is idempotent.
                        continue;
                    }
                    if !working.contains_key(&id) {
                        touch_order.push(id.clone());
                    }
                    working.insert(id, None);
                }
            }
        }

        // Commit the overlay and build the coalesced change log.
        let mut changes = Vec::with_capacity(touch_order.len());
        for id in touch_order {
            let after = working.remove(&id).expect("touched ids are staged");
            let before = self.facets.get(&id).cloned();
            match (before, after) {
                (None, Some(facet)) => {
                    if facet.ephemeral {
                        self.ephemeral_first_seen.insert(id.clone(), sequence);
                    }
                    self.removals.remove(&id);
                    self.facets.insert(id.clone(), facet.clone());
                    changes.push(FacetChange::Added { facet });
                }
                (Some(before), Some(after)) => {
                    if after.ephemeral {
                        self.ephemeral_first_seen
                            .entry(id.clone())
                            .or_insert(sequence);
                    } else {
                        self.ephemeral_first_seen.remove(&id);
                    }
                    self.facets.insert(id.clone(), after.clone());
                    changes.push(FacetChange::Modified { before, after });
                }
                (Some(before), None) => {
                    self.ephemeral_first_seen.remove(&id);
                    self.removals.insert(id.clone());
                    self.facets.remove(&id);
                    changes.push(FacetChange::Removed { facet: before });
                }
                // Added and removed within the same batch: net no-op.
                (None, None) => {}
            }
        }
        tracing::trace!(
            target: "veil.state",
            sequence,
            deltas = deltas.len(),
            changes = changes.len(),
            "deltas_applied"
        );
        Ok(changes)
    }

    /// Append a finished frame whose deltas were already applied with
    /// `apply_deltas` under the same sequence. Notifies listeners.
    pub fn commit_frame(
        &mut self,
        frame: Frame,
        changes: &[FacetChange],
    ) -> Result<(), VeilError> {
        if frame.sequence != self.current_sequence {
            return Err(VeilError::SequenceGap {
                expected: self.current_sequence,
                got: frame.sequence,
            });
        }
        if let Some(last) = self.frame_history.last()
            && frame.sequence != last.sequence + 1
        {
            return Err(VeilError::SequenceGap {
                expected: last.sequence + 1,
                got: frame.sequence,
            });
        }
        self.frame_history.push(frame);
        let frame = self.frame_history.last().expect("just pushed");
        for listener in &self.listeners {
            listener(frame, changes);
        }
        Ok(())
    }

    /// Validate, apply, and append a complete frame: the restoration/replay
    /// path, also used directly by tests. Returns the change log.
    pub fn apply_frame(&mut self, frame: &Frame) -> Result<Vec<FacetChange>, VeilError> {
        let expected = self.current_sequence + 1;
        if frame.sequence != expected {
            return Err(VeilError::SequenceGap {
                expected,
                got: frame.sequence,
            });
        }
        let changes = self.apply_deltas(&frame.deltas, frame.sequence)?;
        self.current_sequence = frame.sequence;
        self.frame_history.push(frame.clone());
        let frame = self.frame_history.last().expect("just pushed");
        for listener in &self.listeners {
            listener(frame, &changes);
        }
        Ok(changes)
    }

    /// Record a frame produced by an agent (speech, actions) rather than by
    /// the frame engine. Allocates the sequence, stamps agent metadata into
    /// the transition record, applies, and appends.
    pub fn record_outgoing_frame(
        &mut self,
        deltas: Vec<VeilDelta>,
        agent: &AgentInfo,
        active_stream: Option<StreamRef>,
    ) -> Result<(Frame, Vec<FacetChange>), VeilError> {
        let sequence = self.next_sequence();
        let mut frame = Frame::new(sequence).with_deltas(deltas);
        frame.transition = Some(serde_json::json!({
            "agent": { "id": agent.id, "name": agent.name }
        }));
        frame.active_stream = active_stream;
        let changes = match self.apply_deltas(&frame.deltas, sequence) {
            Ok(changes) => changes,
            Err(e) => {
                // Roll the allocation back so the counter stays gap-free.
                self.current_sequence -= 1;
                return Err(e);
            }
        };
        self.frame_history.push(frame.clone());
        {
            let frame = self.frame_history.last().expect("just pushed");
            for listener in &self.listeners {
                listener(frame, &changes);
            }
        }
        Ok((frame, changes))
    }

    // ---- listeners ------------------------------------------------------

    pub fn subscribe(&mut self, listener: StateListener) {
        self.listeners.push(listener);
    }

    // ---- recovery -------------------------------------------------------

    /// Drop every frame with `sequence >= from_sequence` from the history
    /// and rewind the counter. The facet map is deliberately not rolled
    /// back; callers snapshot around this operation. Idempotent.
    pub fn delete_recent_frames(&mut self, from_sequence: u64) -> usize {
        let before = self.frame_history.len();
        self.frame_history.retain(|f| f.sequence < from_sequence);
        let removed = before - self.frame_history.len();
        if self.current_sequence >= from_sequence {
            self.current_sequence = from_sequence.saturating_sub(1);
        }
        for seen in self.ephemeral_first_seen.values_mut() {
            if *seen > self.current_sequence {
                *seen = self.current_sequence;
            }
        }
        tracing::info!(
            target: "veil.state",
            from_sequence,
            removed,
            current_sequence = self.current_sequence,
            "recent_frames_deleted"
        );
        removed
    }

    // ---- snapshot / restore ---------------------------------------------

    pub fn to_snapshot(&self) -> VeilStateSnapshot {
        VeilStateSnapshot {
            facets: self.facets.values().cloned().collect(),
            streams: self.streams.values().cloned().collect(),
            agents: self.agents.values().cloned().collect(),
            current_agent: self.current_agent.clone(),
            scopes: self.scopes.iter().cloned().collect(),
            frame_history: self.frame_history.clone(),
            current_sequence: self.current_sequence,
            removals: self.removals.iter().cloned().collect(),
        }
    }

    /// Replace the store contents from a snapshot, keeping listeners, then
    /// rebuild derived caches.
    pub fn set_state(&mut self, snapshot: VeilStateSnapshot) {
        self.facets = snapshot
            .facets
            .into_iter()
            .map(|f| (f.id.clone(), f))
            .collect();
        self.streams = snapshot
            .streams
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        self.agents = snapshot
            .agents
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        self.current_agent = snapshot.current_agent;
        self.scopes = snapshot.scopes.into_iter().collect();
        self.frame_history = snapshot.frame_history;
        self.current_sequence = snapshot.current_sequence;
        self.removals = snapshot.removals.into_iter().collect();
        self.rebuild_state_cache();
    }

    /// Recompute derived bookkeeping from the authoritative maps. Live
    /// ephemerals are stamped at the current sequence, so they are cleaned
    /// on the first frame after restore.
    pub fn rebuild_state_cache(&mut self) {
        self.ephemeral_first_seen = self
            .facets
            .values()
            .filter(|f| f.ephemeral)
            .map(|f| (f.id.clone(), self.current_sequence))
            .collect();
    }
}

impl fmt::Debug for VeilState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VeilState")
            .field("facets", &self.facets.len())
            .field("streams", &self.streams.len())
            .field("agents", &self.agents.len())
            .field("frames", &self.frame_history.len())
            .field("current_sequence", &self.current_sequence)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

fn type_name_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
