#![allow(dead_code)] // Shared across several integration test binaries; each uses a subset.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use core_events::{ElementRef, Event, EventPriority};
use core_pipeline::{
    Effector, EffectorOutput, ExternalAction, FacetFilter, Receptor, Transform,
};
use core_space::Space;
use core_tree::{Component, Element};
use core_veil::{Facet, FacetChange, VeilDelta, VeilState, facet_types};
use serde_json::json;

/// Shared recording sink for fixtures.
pub type Trace = Rc<RefCell<Vec<String>>>;

pub fn trace() -> Trace {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn event(topic: &str, payload: serde_json::Value) -> Event {
    Event::new(topic, ElementRef::new("test-source"), payload)
}

pub fn event_with_priority(topic: &str, priority: EventPriority) -> Event {
    event(topic, serde_json::Value::Null).with_priority(priority)
}

/// A space with one `probe` element hosting the given component.
pub fn space_with(component: Box<dyn Component>) -> Space {
    let mut space = Space::new("space");
    space
        .add_element("space", Element::new("probe", "probe"))
        .expect("attach probe element");
    space
        .add_component("probe", component)
        .expect("attach probe component");
    space
}

// ---- receptors ----------------------------------------------------------

/// Records the topics it sees, in order, and emits one facet per event.
pub struct OrderProbe {
    pub seen: Trace,
    counter: u64,
}

impl OrderProbe {
    pub fn new(seen: &Trace) -> Self {
        Self {
            seen: seen.clone(),
            counter: 0,
        }
    }
}

impl Receptor for OrderProbe {
    fn topics(&self) -> Vec<String> {
        vec!["probe:*".to_string()]
    }
    fn transform(&mut self, event: &Event, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        self.seen.borrow_mut().push(event.topic.clone());
        self.counter += 1;
        Ok(vec![VeilDelta::add(Facet::new(
            format!("probe-{}-{}", state.current_sequence(), self.counter),
            "event",
        ))])
    }
}

impl Component for OrderProbe {
    fn type_name(&self) -> &'static str {
        "order-probe"
    }
    fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
        Some(self)
    }
}

/// Always fails; used to exercise the processor-fault path.
pub struct FailingReceptor;

impl Receptor for FailingReceptor {
    fn topics(&self) -> Vec<String> {
        vec!["boom:*".to_string()]
    }
    fn transform(&mut self, _event: &Event, _state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        anyhow::bail!("receptor exploded")
    }
}

impl Component for FailingReceptor {
    fn type_name(&self) -> &'static str {
        "failing-receptor"
    }
    fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
        Some(self)
    }
}

/// Emits a duplicate `addFacet` for a fixed id on every event: the second
/// frame trips the state-invariant fault path.
pub struct DuplicateAdder;

impl Receptor for DuplicateAdder {
    fn topics(&self) -> Vec<String> {
        vec!["dup:*".to_string()]
    }
    fn transform(&mut self, _event: &Event, _state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        Ok(vec![VeilDelta::add(Facet::new("duplicated", "state"))])
    }
}

impl Component for DuplicateAdder {
    fn type_name(&self) -> &'static str {
        "duplicate-adder"
    }
    fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
        Some(self)
    }
}

// ---- transforms ---------------------------------------------------------

/// Adds a facet of `facet_type` when `requires` is satisfied and the facet
/// is absent. Idempotent by construction.
pub struct ChainTransform {
    pub facet_type: &'static str,
    pub requires: Option<&'static str>,
}

impl Transform for ChainTransform {
    fn process(&mut self, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        if state.facets_of_type(self.facet_type).next().is_some() {
            return Ok(Vec::new());
        }
        if let Some(required) = self.requires
            && state.facets_of_type(required).next().is_none()
        {
            return Ok(Vec::new());
        }
        Ok(vec![VeilDelta::add(Facet::new(
            format!("{}-1", self.facet_type),
            self.facet_type,
        ))])
    }
}

impl Component for ChainTransform {
    fn type_name(&self) -> &'static str {
        "chain-transform"
    }
    fn as_transform(&mut self) -> Option<&mut dyn Transform> {
        Some(self)
    }
}

/// Never settles: rewrites the same facet's state every pass.
pub struct DivergentTransform {
    tick: u64,
}

impl DivergentTransform {
    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl Transform for DivergentTransform {
    fn process(&mut self, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        self.tick += 1;
        if state.has_facet("diverging") {
            Ok(vec![VeilDelta::change_state(
                "diverging",
                json!({ "tick": self.tick }),
            )])
        } else {
            Ok(vec![VeilDelta::add(
                Facet::new("diverging", "state").with_state(json!({ "tick": self.tick })),
            )])
        }
    }
}

impl Component for DivergentTransform {
    fn type_name(&self) -> &'static str {
        "divergent-transform"
    }
    fn as_transform(&mut self) -> Option<&mut dyn Transform> {
        Some(self)
    }
}

// ---- effectors ----------------------------------------------------------

/// Records every change it observes as `kind:type:id`.
pub struct RecordingEffector {
    pub filters: Vec<FacetFilter>,
    pub seen: Trace,
}

impl RecordingEffector {
    pub fn match_all(seen: &Trace) -> Self {
        Self {
            filters: Vec::new(),
            seen: seen.clone(),
        }
    }

    pub fn of_type(facet_type: &str, seen: &Trace) -> Self {
        Self {
            filters: vec![FacetFilter::default().of_type(facet_type)],
            seen: seen.clone(),
        }
    }
}

#[async_trait(?Send)]
impl Effector for RecordingEffector {
    fn facet_filters(&self) -> Vec<FacetFilter> {
        self.filters.clone()
    }
    async fn process(
        &mut self,
        changes: &[FacetChange],
        _state: &VeilState,
    ) -> anyhow::Result<EffectorOutput> {
        for change in changes {
            let kind = match change {
                FacetChange::Added { .. } => "added",
                FacetChange::Modified { .. } => "modified",
                FacetChange::Removed { .. } => "removed",
            };
            self.seen
                .borrow_mut()
                .push(format!("{kind}:{}:{}", change.facet_type(), change.id()));
        }
        Ok(EffectorOutput::none())
    }
}

impl Component for RecordingEffector {
    fn type_name(&self) -> &'static str {
        "recording-effector"
    }
    fn as_effector(&mut self) -> Option<&mut dyn Effector> {
        Some(self)
    }
}

// ---- the console → agent pair (self-contained scenario fixtures) --------

/// Console receptor: `console:input` → durable message + one-shot activation.
pub struct ConsoleFixture {
    counter: u64,
}

impl ConsoleFixture {
    pub fn new() -> Self {
        Self { counter: 0 }
    }
}

impl Receptor for ConsoleFixture {
    fn topics(&self) -> Vec<String> {
        vec!["console:input".to_string()]
    }
    fn transform(&mut self, event: &Event, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        let input = event
            .payload_str("input")
            .ok_or_else(|| anyhow::anyhow!("missing input"))?;
        self.counter += 1;
        let sequence = state.current_sequence();
        Ok(vec![
            VeilDelta::add(
                Facet::new(
                    format!("console-message-{sequence}-{}", self.counter),
                    "console-message",
                )
                .with_content(input),
            ),
            VeilDelta::add(
                Facet::new(
                    format!("agent-activation-{sequence}-{}", self.counter),
                    facet_types::AGENT_ACTIVATION,
                )
                .with_attribute("sourceAgentId", json!("user"))
                .ephemeral(),
            ),
        ])
    }
}

impl Component for ConsoleFixture {
    fn type_name(&self) -> &'static str {
        "console-fixture"
    }
    fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
        Some(self)
    }
}

/// Echo agent: replies to fresh activations with a `console-output` side
/// effect quoting the latest console message.
pub struct EchoAgentFixture;

#[async_trait(?Send)]
impl Effector for EchoAgentFixture {
    fn facet_filters(&self) -> Vec<FacetFilter> {
        vec![FacetFilter::default().of_type(facet_types::AGENT_ACTIVATION)]
    }
    async fn process(
        &mut self,
        changes: &[FacetChange],
        state: &VeilState,
    ) -> anyhow::Result<EffectorOutput> {
        if !changes
            .iter()
            .any(|c| matches!(c, FacetChange::Added { .. }))
        {
            return Ok(EffectorOutput::none());
        }
        let last = state
            .facets_of_type("console-message")
            .filter_map(|f| f.content.as_deref())
            .last()
            .unwrap_or("…");
        Ok(EffectorOutput::none().with_external_action(ExternalAction::new(
            "console-output",
            json!({ "text": format!("you said: {last}") }),
        )))
    }
}

impl Component for EchoAgentFixture {
    fn type_name(&self) -> &'static str {
        "echo-agent-fixture"
    }
    fn as_effector(&mut self) -> Option<&mut dyn Effector> {
        Some(self)
    }
}

// ---- persistence fixture ------------------------------------------------

/// Durable counter: bumps once per `count:*` event; persists its value.
pub struct DurableCounter {
    pub count: u64,
}

impl DurableCounter {
    pub const TYPE_NAME: &'static str = "durable-counter";

    pub fn new() -> Self {
        Self { count: 0 }
    }
}

impl Receptor for DurableCounter {
    fn topics(&self) -> Vec<String> {
        vec!["count:*".to_string()]
    }
    fn transform(&mut self, _event: &Event, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        self.count += 1;
        Ok(vec![VeilDelta::add(Facet::new(
            format!("count-{}", state.current_sequence()),
            "state",
        ))])
    }
}

impl Component for DurableCounter {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn persistent_state(&self) -> Option<serde_json::Value> {
        Some(json!({ "count": self.count }))
    }
    fn apply_persistent_state(&mut self, state: serde_json::Value) -> anyhow::Result<()> {
        self.count = state.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(())
    }
    fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
        Some(self)
    }
}
