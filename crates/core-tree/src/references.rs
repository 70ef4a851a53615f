//! Reference registry: flat name → shared-handle map for dependency
//! injection into components.
//!
//! Populated once at startup (providers as `provider:<id>`, secrets as
//! `secret:<name>`, core services under their plain names) plus one-off
//! registrations by the host. Handles are shared and non-owning from the
//! components' point of view; the registry never participates in teardown.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Default)]
pub struct ReferenceRegistry {
    entries: BTreeMap<String, Rc<dyn Any>>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Rc<dyn Any>) {
        let key = key.into();
        tracing::debug!(target: "space.references", key = key.as_str(), "reference_registered");
        self.entries.insert(key, value);
    }

    pub fn insert_value<T: 'static>(&mut self, key: impl Into<String>, value: T) {
        self.insert(key, Rc::new(value));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Typed lookup; `None` when the key is absent or the stored value has
    /// a different concrete type.
    pub fn get<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        self.entries
            .get(key)
            .and_then(|v| Rc::clone(v).downcast::<T>().ok())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ReferenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceRegistry")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
