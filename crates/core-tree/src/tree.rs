//! The element arena: ownership, lookup, lifecycle, and event dispatch.

use ahash::AHashMap;
use core_events::{
    ElementRef, Event, PHASE_AT_TARGET, PHASE_BUBBLE, PHASE_CAPTURE, PHASE_NONE, topics,
};
use serde_json::Value;

use crate::component::{Component, ComponentSlot, LifecycleCtx, RoleSet};
use crate::component_registry::ComponentRegistry;
use crate::element::Element;
use crate::error::TreeError;
use crate::snapshot::{ComponentSnapshot, ElementSnapshot, ElementTreeSnapshot};

pub struct Tree {
    nodes: AHashMap<String, Element>,
    root_id: String,
}

impl Tree {
    pub fn new(root: Element) -> Self {
        let root_id = root.id.clone();
        let mut nodes = AHashMap::new();
        nodes.insert(root_id.clone(), root);
        Self { nodes, root_id }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.nodes.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids in deterministic (sorted) order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    // ---- structure ------------------------------------------------------

    /// Attach `element` under `parent_id`. Idempotent: re-adding a live id
    /// is a no-op. Returns the mount events to queue for the next frame.
    pub fn add_child(
        &mut self,
        parent_id: &str,
        mut element: Element,
    ) -> Result<Vec<Event>, TreeError> {
        if self.nodes.contains_key(&element.id) {
            return Ok(Vec::new());
        }
        let parent = self
            .nodes
            .get_mut(parent_id)
            .ok_or_else(|| TreeError::MissingParent {
                parent: parent_id.to_string(),
            })?;
        parent.children.push(element.id.clone());
        element.parent = Some(parent_id.to_string());
        let id = element.id.clone();
        let name = element.name.clone();
        self.nodes.insert(id.clone(), element);
        tracing::debug!(target: "tree", id = id.as_str(), name = name.as_str(), parent = parent_id, "element_mounted");
        Ok(vec![Event::new(
            topics::ELEMENT_MOUNT,
            self.ref_of(&id),
            serde_json::json!({ "elementId": id, "name": name, "parentId": parent_id }),
        )])
    }

    /// Detach and destroy the subtree rooted at `id`, bottom-up. Component
    /// `on_unmount` hooks run before their element disappears. Idempotent:
    /// removing an absent id is a no-op. Returns unmount events plus any
    /// events emitted by hooks.
    pub fn remove_child(&mut self, id: &str) -> Result<Vec<Event>, TreeError> {
        if id == self.root_id {
            return Err(TreeError::RootRemoval);
        }
        if !self.nodes.contains_key(id) {
            return Ok(Vec::new());
        }
        let doomed = self.collect_subtree_postorder(id);
        let mut events = Vec::new();
        // Detach from the surviving parent first so lookups during teardown
        // never see a half-attached subtree.
        if let Some(parent_id) = self.nodes[id].parent.clone()
            && let Some(parent) = self.nodes.get_mut(&parent_id)
        {
            parent.children.retain(|c| c != id);
        }
        for doomed_id in doomed {
            let path = self.path_of(&doomed_id);
            let source = self.ref_of(&doomed_id);
            if let Some(mut element) = self.nodes.remove(&doomed_id) {
                for slot in element.components.iter_mut() {
                    let mut ctx = LifecycleCtx::new(&doomed_id, &path, &mut events);
                    if let Err(e) = slot.component.on_unmount(&mut ctx) {
                        tracing::warn!(
                            target: "tree",
                            element = doomed_id.as_str(),
                            component = slot.type_name.as_str(),
                            error = %e,
                            "on_unmount_failed"
                        );
                    }
                }
                tracing::debug!(target: "tree", id = doomed_id.as_str(), name = element.name.as_str(), "element_unmounted");
                events.push(Event::new(
                    topics::ELEMENT_UNMOUNT,
                    source,
                    serde_json::json!({ "elementId": doomed_id, "name": element.name }),
                ));
            }
        }
        Ok(events)
    }

    /// Ids of the subtree rooted at `id`, children first, `id` last.
    pub fn subtree_postorder(&self, id: &str) -> Vec<String> {
        self.collect_subtree_postorder(id)
    }

    /// Children first, node last.
    fn collect_subtree_postorder(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(node) = self.nodes.get(id) {
            for child in &node.children {
                out.extend(self.collect_subtree_postorder(child));
            }
            out.push(id.to_string());
        }
        out
    }

    // ---- components -----------------------------------------------------

    /// Attach a component: `on_init`, then `on_restore` (when restoring) or
    /// `on_mount`. Returns the slot index, the probed role set, and hook
    /// events. Pipeline registration is the caller's business.
    pub fn add_component(
        &mut self,
        element_id: &str,
        component: Box<dyn Component>,
        config: Option<Value>,
        restoring: bool,
    ) -> anyhow::Result<(usize, RoleSet, Vec<Event>)> {
        let path = self.path_of(element_id);
        let element = self
            .nodes
            .get_mut(element_id)
            .ok_or_else(|| TreeError::MissingElement {
                id: element_id.to_string(),
            })?;
        let mut slot = ComponentSlot::new(component, config);
        let mut events = Vec::new();
        {
            let mut ctx = LifecycleCtx::new(element_id, &path, &mut events);
            slot.component.on_init(&mut ctx)?;
            if restoring {
                slot.component.on_restore(&mut ctx)?;
            } else {
                slot.component.on_mount(&mut ctx)?;
            }
        }
        let roles = slot.roles;
        let type_name = slot.type_name.clone();
        element.components.push(slot);
        let index = element.components.len() - 1;
        tracing::debug!(
            target: "tree",
            element = element_id,
            component = type_name.as_str(),
            index,
            restoring,
            "component_attached"
        );
        Ok((index, roles, events))
    }

    /// Flip a component's enabled flag, running `on_enable`/`on_disable` on
    /// an actual transition. Disabled components are skipped by dispatch and
    /// by the pipeline.
    pub fn set_component_enabled(
        &mut self,
        element_id: &str,
        index: usize,
        enabled: bool,
    ) -> anyhow::Result<Vec<Event>> {
        let path = self.path_of(element_id);
        let element = self
            .nodes
            .get_mut(element_id)
            .ok_or_else(|| TreeError::MissingElement {
                id: element_id.to_string(),
            })?;
        let slot = element
            .components
            .get_mut(index)
            .ok_or_else(|| TreeError::MissingComponent {
                element: element_id.to_string(),
                index,
            })?;
        let mut events = Vec::new();
        if slot.enabled != enabled {
            slot.enabled = enabled;
            let mut ctx = LifecycleCtx::new(element_id, &path, &mut events);
            if enabled {
                slot.component.on_enable(&mut ctx)?;
            } else {
                slot.component.on_disable(&mut ctx)?;
            }
        }
        Ok(events)
    }

    // ---- lookup ---------------------------------------------------------

    /// Name path from the root to `id`, inclusive.
    pub fn path_of(&self, id: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.nodes.get(current) {
                Some(node) => {
                    names.push(node.name.clone());
                    cursor = node.parent.as_deref();
                }
                None => break,
            }
        }
        names.reverse();
        names
    }

    /// An `ElementRef` for `id`, with the name path filled in.
    pub fn ref_of(&self, id: &str) -> ElementRef {
        ElementRef::new(id).with_path(self.path_of(id))
    }

    /// Direct child of `parent_id` by name.
    pub fn find_child(&self, parent_id: &str, name: &str) -> Option<&Element> {
        let parent = self.nodes.get(parent_id)?;
        parent
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .find(|e| e.name == name)
    }

    /// Depth-first descendant of `from_id` by name.
    pub fn find_in_children(&self, from_id: &str, name: &str) -> Option<&Element> {
        let node = self.nodes.get(from_id)?;
        for child_id in &node.children {
            if let Some(child) = self.nodes.get(child_id) {
                if child.name == name {
                    return Some(child);
                }
                if let Some(found) = self.find_in_children(child_id, name) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Walk parents to the root: the containing Space of any reachable
    /// element.
    pub fn find_space(&self, id: &str) -> Option<&str> {
        let mut cursor = self.nodes.get(id)?;
        loop {
            match cursor.parent.as_deref() {
                Some(parent) => cursor = self.nodes.get(parent)?,
                None => return Some(&cursor.id),
            }
        }
    }

    // ---- dispatch -------------------------------------------------------

    /// Broadcast: recursively visit every active element (inactive subtrees
    /// are skipped whole) and deliver to those subscribed to the topic.
    /// `immediate_propagation_stopped` halts the remainder of the broadcast.
    pub fn dispatch_broadcast(&mut self, event: &mut Event) -> Vec<Event> {
        let order = self.active_preorder(&self.root_id.clone());
        let mut emitted = Vec::new();
        for id in order {
            if event.immediate_propagation_stopped {
                break;
            }
            let subscribed = self
                .nodes
                .get(&id)
                .is_some_and(|e| e.is_subscribed_to(&event.topic));
            if subscribed {
                self.deliver(&id, event, &mut emitted);
            }
        }
        emitted
    }

    /// DOM-style three-phase walk toward the target element, which is
    /// resolved from `event.target` when set, else from the event source.
    /// Capture runs root→parent, then at-target, then bubble parent→root
    /// unless `bubbles` is false. Subscription filters do not apply; the
    /// walk is already targeted.
    pub fn dispatch_propagation(&mut self, event: &mut Event) -> Vec<Event> {
        let target_id = event
            .target
            .as_ref()
            .map(|t| t.element_id.clone())
            .unwrap_or_else(|| event.source.element_id.clone());
        let mut emitted = Vec::new();
        // Depth-first confirmation that the target is reachable from the root.
        if !self.is_reachable(&target_id) {
            tracing::debug!(
                target: "tree.dispatch",
                topic = event.topic.as_str(),
                target = target_id.as_str(),
                "propagation_target_unreachable"
            );
            return emitted;
        }
        if event.target.is_none() {
            event.target = Some(self.ref_of(&target_id));
        }
        let mut chain = Vec::new();
        let mut cursor = Some(target_id.clone());
        while let Some(id) = cursor {
            cursor = self.nodes.get(&id).and_then(|n| n.parent.clone());
            chain.push(id);
        }
        chain.reverse(); // root .. target

        event.event_phase = PHASE_CAPTURE;
        for id in &chain[..chain.len() - 1] {
            if event.propagation_stopped {
                break;
            }
            if self.nodes.get(id).is_some_and(|e| e.active) {
                self.deliver(id, event, &mut emitted);
            }
        }
        if !event.propagation_stopped {
            event.event_phase = PHASE_AT_TARGET;
            if self.nodes.get(&target_id).is_some_and(|e| e.active) {
                self.deliver(&target_id, event, &mut emitted);
            }
        }
        if event.bubbles && !event.propagation_stopped {
            event.event_phase = PHASE_BUBBLE;
            for id in chain[..chain.len() - 1].iter().rev() {
                if event.propagation_stopped {
                    break;
                }
                if self.nodes.get(id).is_some_and(|e| e.active) {
                    self.deliver(id, event, &mut emitted);
                }
            }
        }
        event.event_phase = PHASE_NONE;
        emitted
    }

    /// Pre-order ids of the active portion of the tree.
    fn active_preorder(&self, from: &str) -> Vec<String> {
        let mut out = Vec::new();
        let Some(node) = self.nodes.get(from) else {
            return out;
        };
        if !node.active {
            return out;
        }
        out.push(from.to_string());
        for child in &node.children {
            out.extend(self.active_preorder(child));
        }
        out
    }

    fn is_reachable(&self, id: &str) -> bool {
        let mut cursor = id;
        loop {
            match self.nodes.get(cursor) {
                Some(node) => match node.parent.as_deref() {
                    Some(parent) => cursor = parent,
                    None => return cursor == self.root_id,
                },
                None => return false,
            }
        }
    }

    /// Deliver to one element: the declared action map first (for
    /// `element:action` events naming a registered action), then every
    /// enabled component in slot order, honoring
    /// `immediate_propagation_stopped` between handlers.
    fn deliver(&mut self, id: &str, event: &mut Event, emitted: &mut Vec<Event>) {
        let path = self.path_of(id);
        let id = id.to_string();
        let Some(element) = self.nodes.get_mut(&id) else {
            return;
        };
        if event.topic == topics::ELEMENT_ACTION
            && let Some(action) = event
                .payload
                .get("action")
                .and_then(|v| v.as_str())
                .map(str::to_string)
            && let Some(handler) = element.actions.get_mut(&action)
        {
            handler(event, emitted);
        }
        for slot in element.components.iter_mut() {
            if event.immediate_propagation_stopped {
                break;
            }
            if !slot.enabled {
                continue;
            }
            let mut ctx = LifecycleCtx::new(&id, &path, emitted);
            if let Err(e) = slot.component.handle_event(event, &mut ctx) {
                tracing::warn!(
                    target: "tree.dispatch",
                    element = id.as_str(),
                    component = slot.type_name.as_str(),
                    topic = event.topic.as_str(),
                    error = %e,
                    "component_event_handler_failed"
                );
            }
        }
    }

    // ---- persistence ----------------------------------------------------

    /// Serialize structure, subscriptions, and component persistent state.
    /// Nodes are emitted in breadth-first order (parents before children);
    /// sibling order is preserved. Component serializer versions come from
    /// the registry; unregistered (programmatic-only) component types are
    /// recorded at version 0 and skipped on restore.
    pub fn to_snapshot(&self, registry: &ComponentRegistry) -> ElementTreeSnapshot {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut queue = std::collections::VecDeque::from([self.root_id.clone()]);
        while let Some(id) = queue.pop_front() {
            let Some(element) = self.nodes.get(&id) else {
                continue;
            };
            queue.extend(element.children.iter().cloned());
            let components = element
                .components
                .iter()
                .map(|slot| ComponentSnapshot {
                    type_name: slot.type_name.clone(),
                    version: registry.version_of(&slot.type_name).unwrap_or(0),
                    config: slot.config.clone(),
                    state: slot.component.persistent_state(),
                    enabled: slot.enabled,
                })
                .collect();
            nodes.push(ElementSnapshot {
                id: element.id.clone(),
                name: element.name.clone(),
                parent: element.parent.clone(),
                active: element.active,
                subscriptions: element.subscriptions.clone(),
                components,
            });
        }
        ElementTreeSnapshot { nodes }
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root_id)
            .field("elements", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Trace(Rc<RefCell<Vec<String>>>);

    struct Probe {
        label: &'static str,
        trace: Trace,
        stop_immediate_on: Option<&'static str>,
    }

    impl Probe {
        fn new(label: &'static str, trace: &Trace) -> Self {
            Self {
                label,
                trace: trace.clone(),
                stop_immediate_on: None,
            }
        }
    }

    impl Component for Probe {
        fn type_name(&self) -> &'static str {
            "probe"
        }
        fn on_unmount(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
            self.trace.0.borrow_mut().push(format!("unmount:{}", self.label));
            Ok(())
        }
        fn handle_event(
            &mut self,
            event: &mut Event,
            _ctx: &mut LifecycleCtx,
        ) -> anyhow::Result<()> {
            self.trace
                .0
                .borrow_mut()
                .push(format!("{}@{}", self.label, event.event_phase));
            if self.stop_immediate_on == Some(event.topic.as_str()) {
                event.stop_immediate_propagation();
            }
            Ok(())
        }
    }

    fn build_tree() -> (Tree, Trace) {
        let trace = Trace::default();
        let mut tree = Tree::new(Element::new("space", "space"));
        tree.add_child("space", Element::new("a", "alpha")).unwrap();
        tree.add_child("a", Element::new("b", "beta")).unwrap();
        tree.add_child("space", Element::new("c", "gamma")).unwrap();
        (tree, trace)
    }

    #[test]
    fn add_child_is_idempotent_and_emits_mount() {
        let mut tree = Tree::new(Element::new("space", "space"));
        let events = tree
            .add_child("space", Element::new("w", "widget"))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, topics::ELEMENT_MOUNT);
        assert_eq!(events[0].source.element_path, vec!["space", "widget"]);
        let again = tree
            .add_child("space", Element::new("w", "widget"))
            .unwrap();
        assert!(again.is_empty(), "duplicate add is a no-op");
        assert_eq!(tree.len(), 2);
        assert!(matches!(
            tree.add_child("ghost", Element::new("x", "x")),
            Err(TreeError::MissingParent { .. })
        ));
    }

    #[test]
    fn remove_child_cascades_bottom_up_with_unmount_hooks() {
        let (mut tree, trace) = build_tree();
        tree.add_component("a", Box::new(Probe::new("A", &trace)), None, false)
            .unwrap();
        tree.add_component("b", Box::new(Probe::new("B", &trace)), None, false)
            .unwrap();
        let events = tree.remove_child("a").unwrap();
        // Hooks ran children-first.
        assert_eq!(
            trace.0.borrow().as_slice(),
            &["unmount:B".to_string(), "unmount:A".to_string()]
        );
        let unmounts: Vec<&str> = events
            .iter()
            .filter(|e| e.topic == topics::ELEMENT_UNMOUNT)
            .map(|e| e.source.element_id.as_str())
            .collect();
        assert_eq!(unmounts, vec!["b", "a"]);
        assert!(!tree.contains("a") && !tree.contains("b"));
        assert!(tree.remove_child("a").unwrap().is_empty(), "idempotent");
        assert_eq!(tree.remove_child("space"), Err(TreeError::RootRemoval));
    }

    #[test]
    fn path_and_space_lookup() {
        let (tree, _) = build_tree();
        assert_eq!(tree.path_of("b"), vec!["space", "alpha", "beta"]);
        assert_eq!(tree.find_space("b"), Some("space"));
        assert_eq!(tree.find_child("space", "alpha").map(|e| e.id.as_str()), Some("a"));
        assert!(tree.find_child("space", "beta").is_none(), "not a direct child");
        assert_eq!(
            tree.find_in_children("space", "beta").map(|e| e.id.as_str()),
            Some("b")
        );
    }

    #[test]
    fn broadcast_visits_active_subscribed_elements_in_preorder() {
        let (mut tree, trace) = build_tree();
        for id in ["a", "b", "c"] {
            tree.get_mut(id).unwrap().subscribe("probe:*");
        }
        tree.add_component("a", Box::new(Probe::new("A", &trace)), None, false)
            .unwrap();
        tree.add_component("b", Box::new(Probe::new("B", &trace)), None, false)
            .unwrap();
        tree.add_component("c", Box::new(Probe::new("C", &trace)), None, false)
            .unwrap();
        let mut event = Event::new("probe:hit", ElementRef::new("space"), serde_json::Value::Null);
        tree.dispatch_broadcast(&mut event);
        assert_eq!(
            trace.0.borrow().as_slice(),
            &["A@0".to_string(), "B@0".to_string(), "C@0".to_string()]
        );
    }

    #[test]
    fn broadcast_skips_inactive_subtrees_and_unsubscribed_elements() {
        let (mut tree, trace) = build_tree();
        tree.get_mut("a").unwrap().subscribe("probe:*");
        tree.get_mut("b").unwrap().subscribe("probe:*");
        tree.get_mut("c").unwrap().subscribe("other:*");
        tree.add_component("a", Box::new(Probe::new("A", &trace)), None, false)
            .unwrap();
        tree.add_component("b", Box::new(Probe::new("B", &trace)), None, false)
            .unwrap();
        tree.add_component("c", Box::new(Probe::new("C", &trace)), None, false)
            .unwrap();
        tree.get_mut("a").unwrap().active = false;
        let mut event = Event::new("probe:hit", ElementRef::new("space"), serde_json::Value::Null);
        tree.dispatch_broadcast(&mut event);
        // `a` inactive hides `b`; `c` not subscribed to the topic.
        assert!(trace.0.borrow().is_empty());
    }

    #[test]
    fn immediate_stop_halts_a_broadcast() {
        let (mut tree, trace) = build_tree();
        tree.get_mut("a").unwrap().subscribe("*");
        tree.get_mut("c").unwrap().subscribe("*");
        let mut stopper = Probe::new("A", &trace);
        stopper.stop_immediate_on = Some("probe:hit");
        tree.add_component("a", Box::new(stopper), None, false).unwrap();
        tree.add_component("c", Box::new(Probe::new("C", &trace)), None, false)
            .unwrap();
        let mut event = Event::new("probe:hit", ElementRef::new("space"), serde_json::Value::Null);
        tree.dispatch_broadcast(&mut event);
        assert_eq!(trace.0.borrow().as_slice(), &["A@0".to_string()]);
    }

    #[test]
    fn propagation_walks_capture_target_bubble() {
        let (mut tree, trace) = build_tree();
        tree.add_component("space", Box::new(Probe::new("S", &trace)), None, false)
            .unwrap();
        tree.add_component("a", Box::new(Probe::new("A", &trace)), None, false)
            .unwrap();
        tree.add_component("b", Box::new(Probe::new("B", &trace)), None, false)
            .unwrap();
        let mut event = Event::new("ping:pong", ElementRef::new("b"), serde_json::Value::Null);
        event.broadcast = false;
        tree.dispatch_propagation(&mut event);
        assert_eq!(
            trace.0.borrow().as_slice(),
            &[
                "S@1".to_string(),
                "A@1".to_string(),
                "B@2".to_string(),
                "A@3".to_string(),
                "S@3".to_string(),
            ]
        );
        assert_eq!(event.event_phase, PHASE_NONE, "phase reset after dispatch");
        assert_eq!(
            event.target.as_ref().map(|t| t.element_id.as_str()),
            Some("b"),
            "target resolved from source"
        );
    }

    #[test]
    fn non_bubbling_events_skip_the_bubble_phase() {
        let (mut tree, trace) = build_tree();
        tree.add_component("a", Box::new(Probe::new("A", &trace)), None, false)
            .unwrap();
        tree.add_component("b", Box::new(Probe::new("B", &trace)), None, false)
            .unwrap();
        let mut event = Event::new("ping:pong", ElementRef::new("b"), serde_json::Value::Null)
            .non_bubbling();
        event.broadcast = false;
        tree.dispatch_propagation(&mut event);
        assert_eq!(
            trace.0.borrow().as_slice(),
            &["A@1".to_string(), "B@2".to_string()]
        );
    }

    #[test]
    fn action_map_runs_before_components() {
        let (mut tree, trace) = build_tree();
        let t = trace.clone();
        tree.get_mut("a").unwrap().subscribe("element:action");
        tree.get_mut("a").unwrap().register_action(
            "ping",
            Box::new(move |_ev, out| {
                t.0.borrow_mut().push("action:ping".into());
                out.push(Event::new(
                    "pong:emitted",
                    ElementRef::new("a"),
                    serde_json::Value::Null,
                ));
            }),
        );
        tree.add_component("a", Box::new(Probe::new("A", &trace)), None, false)
            .unwrap();
        let mut event = Event::new(
            topics::ELEMENT_ACTION,
            ElementRef::new("space"),
            serde_json::json!({ "action": "ping" }),
        );
        let emitted = tree.dispatch_broadcast(&mut event);
        assert_eq!(
            trace.0.borrow().as_slice(),
            &["action:ping".to_string(), "A@0".to_string()]
        );
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].topic, "pong:emitted");
    }

    #[test]
    fn enable_disable_transitions_run_hooks_once() {
        struct Flips {
            trace: Trace,
        }
        impl Component for Flips {
            fn type_name(&self) -> &'static str {
                "flips"
            }
            fn on_enable(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
                self.trace.0.borrow_mut().push("enable".into());
                Ok(())
            }
            fn on_disable(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
                self.trace.0.borrow_mut().push("disable".into());
                Ok(())
            }
        }
        let (mut tree, trace) = build_tree();
        let (index, _, _) = tree
            .add_component("a", Box::new(Flips { trace: trace.clone() }), None, false)
            .unwrap();
        tree.set_component_enabled("a", index, false).unwrap();
        tree.set_component_enabled("a", index, false).unwrap(); // no transition
        tree.set_component_enabled("a", index, true).unwrap();
        assert_eq!(
            trace.0.borrow().as_slice(),
            &["disable".to_string(), "enable".to_string()]
        );
    }

    #[test]
    fn snapshot_lists_parents_before_children() {
        let (mut tree, _trace) = build_tree();
        tree.get_mut("b").unwrap().subscribe("console:*");
        let registry = ComponentRegistry::new();
        let snap = tree.to_snapshot(&registry);
        assert_eq!(snap.nodes.len(), 4);
        assert_eq!(snap.root().unwrap().id, "space");
        let index_of = |id: &str| snap.nodes.iter().position(|n| n.id == id).unwrap();
        assert!(index_of("space") < index_of("a"));
        assert!(index_of("a") < index_of("b"));
        let b = &snap.nodes[index_of("b")];
        assert_eq!(b.parent.as_deref(), Some("a"));
        assert_eq!(b.subscriptions, vec!["console:*"]);
    }
}
