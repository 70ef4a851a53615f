//! A single node of the element tree.

use ahash::AHashMap;
use core_events::{Event, pattern};

use crate::component::ComponentSlot;

/// Handler bound to a named action on an element; invoked for
/// `element:action` events whose payload names the action. Emitted events
/// land in the next frame.
pub type ActionHandler = Box<dyn FnMut(&Event, &mut Vec<Event>)>;

pub struct Element {
    pub id: String,
    pub name: String,
    pub(crate) parent: Option<String>,
    pub(crate) children: Vec<String>,
    pub(crate) components: Vec<ComponentSlot>,
    pub active: bool,
    pub(crate) subscriptions: Vec<String>,
    pub(crate) actions: AHashMap<String, ActionHandler>,
}

impl Element {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
            active: true,
            subscriptions: Vec::new(),
            actions: AHashMap::new(),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn components(&self) -> &[ComponentSlot] {
        &self.components
    }

    pub fn component(&self, index: usize) -> Option<&ComponentSlot> {
        self.components.get(index)
    }

    pub fn component_mut(&mut self, index: usize) -> Option<&mut ComponentSlot> {
        self.components.get_mut(index)
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Add a topic pattern subscription; duplicates are ignored.
    pub fn subscribe(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        if !self.subscriptions.contains(&pattern) {
            self.subscriptions.push(pattern);
        }
    }

    pub fn is_subscribed_to(&self, topic: &str) -> bool {
        pattern::any_topic_matches(&self.subscriptions, topic)
    }

    /// Bind a handler to a named `element:action`.
    pub fn register_action(&mut self, name: impl Into<String>, handler: ActionHandler) {
        self.actions.insert(name.into(), handler);
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("components", &self.components)
            .field("active", &self.active)
            .field("subscriptions", &self.subscriptions)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
