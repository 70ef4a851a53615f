//! The element-tree maintainer: the single place where facet-driven tree
//! mutation happens.
//!
//! Three inputs each frame:
//! - `element-request` facets (produced from `element:create` events by
//!   [`ElementRequestReceptor`]): realize a new element under the named
//!   parent, attach registry-constructed components, emit the durable
//!   `element-tree` facet, and drop the transient request;
//! - `element:destroy` events: cascade-delete the subtree bottom-up and mark
//!   the affected `element-tree` facets inactive;
//! - `component:add` events: attach a component to a live element and
//!   refresh its `element-tree` facet.
//!
//! Bootstrap and restoration add children directly but emit the same
//! `element-tree` facets, so persistence captures every path uniformly.

use core_events::{ElementRef, Event, system_error_event, topics};
use core_pipeline::Receptor;
use core_tree::{ComponentRegistry, Element, RoleSet, Tree};
use core_veil::{Facet, FacetChange, VeilDelta, VeilState, facet_types};
use serde_json::{Value, json};

use crate::space::ProcessorRef;

/// Phase-1 half: turns `element:create` events into transient
/// `element-request` facets.
#[derive(Debug, Default)]
pub struct ElementRequestReceptor {
    emitted: u64,
}

impl Receptor for ElementRequestReceptor {
    fn topics(&self) -> Vec<String> {
        vec![topics::ELEMENT_CREATE.to_string()]
    }

    fn transform(
        &mut self,
        event: &Event,
        state: &VeilState,
    ) -> anyhow::Result<Vec<VeilDelta>> {
        let Some(name) = event.payload_str("name") else {
            anyhow::bail!("element:create payload missing `name`");
        };
        self.emitted += 1;
        let mut request_state = json!({
            "parentId": event.payload.get("parentId").cloned().unwrap_or(Value::String("root".into())),
            "name": name,
            "components": event.payload.get("components").cloned().unwrap_or(Value::Array(Vec::new())),
        });
        if let Some(element_id) = event.payload.get("elementId") {
            request_state["elementId"] = element_id.clone();
        }
        if let Some(subscriptions) = event.payload.get("subscriptions") {
            request_state["subscriptions"] = subscriptions.clone();
        }
        let facet = Facet::new(
            format!(
                "element-request-{}-{}",
                state.current_sequence(),
                self.emitted
            ),
            facet_types::ELEMENT_REQUEST,
        )
        .with_state(request_state)
        .ephemeral();
        Ok(vec![VeilDelta::add(facet)])
    }
}

/// What one maintainer pass produced, for the engine to absorb.
#[derive(Default)]
pub struct TreeMaintainerOutput {
    pub events: Vec<Event>,
    /// Trailing deltas; applied after phase 4 and surfaced to effectors in
    /// the next frame.
    pub deltas: Vec<VeilDelta>,
    /// Structured record of tree changes, stored on the frame transition and
    /// in the delta file.
    pub element_operations: Option<Value>,
    /// RETM registrations for components created this pass.
    pub registrations: Vec<(ProcessorRef, RoleSet)>,
}

/// The durable `element-tree` facet describing `element_id` as it stands.
pub fn element_tree_facet(tree: &Tree, element_id: &str) -> Option<Facet> {
    let element = tree.get(element_id)?;
    let components: Vec<Value> = element
        .components()
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            let mut entry = json!({ "type": slot.type_name, "index": index });
            if let Some(config) = &slot.config {
                entry["config"] = config.clone();
            }
            entry
        })
        .collect();
    let state = json!({
        "elementId": element.id,
        "name": element.name,
        "parentId": element.parent(),
        "active": element.active,
        "components": components,
        "subscriptions": element.subscriptions(),
    });
    Some(
        Facet::new(format!("element-tree-{element_id}"), facet_types::ELEMENT_TREE)
            .with_state(state)
            .with_entity("element", element_id),
    )
}

fn upsert_delta(veil: &VeilState, facet: Facet) -> VeilDelta {
    if veil.has_facet(&facet.id) {
        VeilDelta::RewriteFacet {
            id: facet.id.clone(),
            content: facet.content.clone(),
            state: facet.state.clone(),
            aspects: Some(facet.aspects.clone()),
            ephemeral: Some(facet.ephemeral),
        }
    } else {
        VeilDelta::add(facet)
    }
}

/// One phase-4 pass over this frame's changes and events.
pub fn run(
    tree: &mut Tree,
    veil: &VeilState,
    component_types: &ComponentRegistry,
    changes: &[FacetChange],
    events: &[Event],
) -> TreeMaintainerOutput {
    let mut out = TreeMaintainerOutput::default();
    let mut operations: Vec<Value> = Vec::new();

    for change in changes {
        if let FacetChange::Added { facet } = change
            && facet.facet_type == facet_types::ELEMENT_REQUEST
        {
            realize_request(tree, veil, component_types, facet, &mut out, &mut operations);
        }
    }

    for event in events {
        match event.topic.as_str() {
            topics::ELEMENT_DESTROY => {
                destroy_subtree(tree, veil, event, &mut out, &mut operations);
            }
            topics::COMPONENT_ADD => {
                attach_component(tree, veil, component_types, event, &mut out, &mut operations);
            }
            _ => {}
        }
    }

    if !operations.is_empty() {
        out.element_operations = Some(Value::Array(operations));
    }
    out
}

fn realize_request(
    tree: &mut Tree,
    veil: &VeilState,
    component_types: &ComponentRegistry,
    request: &Facet,
    out: &mut TreeMaintainerOutput,
    operations: &mut Vec<Value>,
) {
    let Some(state) = request.state.as_ref() else {
        return;
    };
    let Some(name) = state.get("name").and_then(Value::as_str) else {
        tracing::warn!(target: "space.tree", request = request.id.as_str(), "element_request_missing_name");
        return;
    };
    let parent_raw = state
        .get("parentId")
        .and_then(Value::as_str)
        .unwrap_or("root");
    let parent_id = if parent_raw == "root" {
        tree.root_id().to_string()
    } else {
        parent_raw.to_string()
    };
    if !tree.contains(&parent_id) {
        out.events.push(system_error_event(
            ElementRef::new(tree.root_id()),
            "maintainer-error",
            format!("element request `{}`: unknown parent `{parent_id}`", request.id),
        ));
        out.deltas.push(VeilDelta::remove(request.id.clone()));
        return;
    }

    // Stable id: requested explicitly, or derived from the name and the
    // creating sequence. Suffix on collision.
    let mut element_id = state
        .get("elementId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{name}-{}", veil.current_sequence()));
    let mut suffix = 1;
    while tree.contains(&element_id) {
        suffix += 1;
        element_id = format!("{name}-{}-{suffix}", veil.current_sequence());
    }

    let mut element = Element::new(element_id.clone(), name);
    if let Some(subs) = state.get("subscriptions").and_then(Value::as_array) {
        for pattern in subs.iter().filter_map(Value::as_str) {
            element.subscribe(pattern);
        }
    }
    match tree.add_child(&parent_id, element) {
        Ok(events) => out.events.extend(events),
        Err(e) => {
            out.events.push(system_error_event(
                ElementRef::new(tree.root_id()),
                "maintainer-error",
                e,
            ));
            return;
        }
    }

    if let Some(specs) = state.get("components").and_then(Value::as_array) {
        for spec in specs {
            let Some(type_name) = spec.get("type").and_then(Value::as_str) else {
                continue;
            };
            let config = spec.get("config").cloned();
            match component_types.create(type_name, config.as_ref()) {
                Ok(component) => {
                    match tree.add_component(&element_id, component, config, false) {
                        Ok((index, roles, events)) => {
                            out.events.extend(events);
                            out.registrations.push((
                                ProcessorRef {
                                    element_id: element_id.clone(),
                                    component_index: index,
                                },
                                roles,
                            ));
                        }
                        Err(e) => out.events.push(system_error_event(
                            ElementRef::new(element_id.clone()),
                            "maintainer-error",
                            e,
                        )),
                    }
                }
                Err(e) => out.events.push(system_error_event(
                    ElementRef::new(element_id.clone()),
                    "maintainer-error",
                    format!("component `{type_name}`: {e}"),
                )),
            }
        }
    }

    if let Some(facet) = element_tree_facet(tree, &element_id) {
        out.deltas.push(upsert_delta(veil, facet));
    }
    out.deltas.push(VeilDelta::remove(request.id.clone()));
    operations.push(json!({
        "op": "create",
        "elementId": element_id,
        "name": name,
        "parentId": parent_id,
    }));
    tracing::info!(
        target: "space.tree",
        element = element_id.as_str(),
        name,
        parent = parent_id.as_str(),
        "element_realized"
    );
}

fn destroy_subtree(
    tree: &mut Tree,
    veil: &VeilState,
    event: &Event,
    out: &mut TreeMaintainerOutput,
    operations: &mut Vec<Value>,
) {
    let Some(element_id) = event.payload_str("elementId") else {
        return;
    };
    if element_id == tree.root_id() || !tree.contains(element_id) {
        return;
    }
    let doomed = tree.subtree_postorder(element_id);
    match tree.remove_child(element_id) {
        Ok(events) => out.events.extend(events),
        Err(e) => {
            out.events.push(system_error_event(
                ElementRef::new(tree.root_id()),
                "maintainer-error",
                e,
            ));
            return;
        }
    }
    for id in &doomed {
        let facet_id = format!("element-tree-{id}");
        if veil.has_facet(&facet_id) {
            out.deltas
                .push(VeilDelta::change_state(facet_id, json!({ "active": false })));
        }
    }
    operations.push(json!({ "op": "destroy", "elementId": element_id, "removed": doomed }));
}

fn attach_component(
    tree: &mut Tree,
    veil: &VeilState,
    component_types: &ComponentRegistry,
    event: &Event,
    out: &mut TreeMaintainerOutput,
    operations: &mut Vec<Value>,
) {
    let Some(element_id) = event.payload_str("elementId") else {
        return;
    };
    let spec = event.payload.get("component").cloned().unwrap_or_default();
    let Some(type_name) = spec.get("type").and_then(Value::as_str) else {
        return;
    };
    if !tree.contains(element_id) {
        out.events.push(system_error_event(
            ElementRef::new(tree.root_id()),
            "maintainer-error",
            format!("component:add on unknown element `{element_id}`"),
        ));
        return;
    }
    let config = spec.get("config").cloned();
    match component_types.create(type_name, config.as_ref()) {
        Ok(component) => match tree.add_component(element_id, component, config, false) {
            Ok((index, roles, events)) => {
                out.events.extend(events);
                out.registrations.push((
                    ProcessorRef {
                        element_id: element_id.to_string(),
                        component_index: index,
                    },
                    roles,
                ));
                if let Some(facet) = element_tree_facet(tree, element_id) {
                    out.deltas.push(upsert_delta(veil, facet));
                }
                operations.push(json!({
                    "op": "componentAdd",
                    "elementId": element_id,
                    "type": type_name,
                    "index": index,
                }));
            }
            Err(e) => out.events.push(system_error_event(
                ElementRef::new(element_id.to_string()),
                "maintainer-error",
                e,
            )),
        },
        Err(e) => out.events.push(system_error_event(
            ElementRef::new(element_id.to_string()),
            "maintainer-error",
            format!("component `{type_name}`: {e}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_tree::Component;

    struct Counter;

    impl Component for Counter {
        fn type_name(&self) -> &'static str {
            "counter"
        }
    }

    fn registry() -> ComponentRegistry {
        let mut reg = ComponentRegistry::new();
        reg.register("counter", 1, |_config| Ok(Box::new(Counter)));
        reg
    }

    fn request_facet(state: Value) -> Facet {
        Facet::new("element-request-1-1", facet_types::ELEMENT_REQUEST)
            .with_state(state)
            .ephemeral()
    }

    #[test]
    fn receptor_translates_create_events_into_requests() {
        let mut state = VeilState::new();
        state.next_sequence();
        let mut receptor = ElementRequestReceptor::default();
        let event = Event::new(
            topics::ELEMENT_CREATE,
            ElementRef::new("console"),
            json!({ "parentId": "root", "name": "widget", "components": [{ "type": "counter" }] }),
        );
        let deltas = receptor.transform(&event, &state).unwrap();
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            VeilDelta::AddFacet { facet } => {
                assert_eq!(facet.facet_type, facet_types::ELEMENT_REQUEST);
                assert!(facet.ephemeral);
                assert_eq!(facet.state_field("name"), Some(&json!("widget")));
            }
            other => panic!("expected addFacet, got {other:?}"),
        }
        // Missing name is a processor fault.
        let bad = Event::new(topics::ELEMENT_CREATE, ElementRef::new("x"), json!({}));
        assert!(receptor.transform(&bad, &state).is_err());
    }

    #[test]
    fn realizes_requests_with_components_and_durable_facet() {
        let mut tree = Tree::new(Element::new("space", "space"));
        let mut veil = VeilState::new();
        veil.next_sequence();
        let request = request_facet(json!({
            "parentId": "root",
            "name": "widget",
            "components": [{ "type": "counter" }],
        }));
        let changes = vec![FacetChange::Added {
            facet: request.clone(),
        }];
        let out = run(&mut tree, &veil, &registry(), &changes, &[]);

        let widget = tree.find_in_children("space", "widget").expect("realized");
        assert_eq!(widget.components().len(), 1);
        assert_eq!(out.registrations.len(), 1);

        // Durable facet plus request removal.
        let add = out
            .deltas
            .iter()
            .find_map(|d| match d {
                VeilDelta::AddFacet { facet } if facet.facet_type == facet_types::ELEMENT_TREE => {
                    Some(facet)
                }
                _ => None,
            })
            .expect("element-tree facet");
        assert_eq!(
            add.state_field("components"),
            Some(&json!([{ "type": "counter", "index": 0 }]))
        );
        assert!(
            out.deltas
                .iter()
                .any(|d| matches!(d, VeilDelta::RemoveFacet { id } if id == &request.id))
        );
        assert!(out.element_operations.is_some());
    }

    #[test]
    fn unknown_parent_surfaces_an_error_and_drops_the_request() {
        let mut tree = Tree::new(Element::new("space", "space"));
        let veil = VeilState::new();
        let request = request_facet(json!({ "parentId": "nowhere", "name": "widget" }));
        let changes = vec![FacetChange::Added {
            facet: request.clone(),
        }];
        let out = run(&mut tree, &veil, &registry(), &changes, &[]);
        assert_eq!(tree.len(), 1, "nothing realized");
        assert!(out.events.iter().any(|e| e.topic == topics::SYSTEM_ERROR));
        assert!(
            out.deltas
                .iter()
                .any(|d| matches!(d, VeilDelta::RemoveFacet { id } if id == &request.id))
        );
    }

    #[test]
    fn destroy_marks_facets_inactive_bottom_up() {
        let mut tree = Tree::new(Element::new("space", "space"));
        tree.add_child("space", Element::new("a", "alpha")).unwrap();
        tree.add_child("a", Element::new("b", "beta")).unwrap();
        let mut veil = VeilState::new();
        let deltas: Vec<VeilDelta> = ["a", "b"]
            .iter()
            .filter_map(|id| element_tree_facet(&tree, id))
            .map(VeilDelta::add)
            .collect();
        veil.apply_deltas(&deltas, 1).unwrap();

        let destroy = Event::new(
            topics::ELEMENT_DESTROY,
            ElementRef::new("space"),
            json!({ "elementId": "a" }),
        );
        let out = run(&mut tree, &veil, &registry(), &[], &[destroy]);
        assert!(!tree.contains("a") && !tree.contains("b"));
        let inactivated: Vec<&str> = out
            .deltas
            .iter()
            .filter_map(|d| match d {
                VeilDelta::ChangeState { id, state } if state["active"] == json!(false) => {
                    Some(id.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(inactivated, vec!["element-tree-b", "element-tree-a"]);
    }

    #[test]
    fn component_add_updates_the_element_tree_facet() {
        let mut tree = Tree::new(Element::new("space", "space"));
        tree.add_child("space", Element::new("w", "widget")).unwrap();
        let mut veil = VeilState::new();
        let facet = element_tree_facet(&tree, "w").unwrap();
        veil.apply_deltas(&[VeilDelta::add(facet)], 1).unwrap();

        let add = Event::new(
            topics::COMPONENT_ADD,
            ElementRef::new("space"),
            json!({ "elementId": "w", "component": { "type": "counter" } }),
        );
        let out = run(&mut tree, &veil, &registry(), &[], &[add]);
        assert_eq!(tree.get("w").unwrap().components().len(), 1);
        assert_eq!(out.registrations.len(), 1);
        // Facet already live: refresh arrives as a rewrite.
        assert!(
            out.deltas
                .iter()
                .any(|d| matches!(d, VeilDelta::RewriteFacet { id, .. } if id == "element-tree-w"))
        );
    }
}
