//! Core-service handles bound in the reference registry.
//!
//! The registry is populated at Space construction with `space` and
//! `veil-state`, before the host adds providers, secrets, and application
//! bindings. The handles are shared and non-owning: the Space remains the
//! owner of the queue and the store, and hands out `Rc<RefCell<…>>` views
//! through these typed wrappers.
//!
//! Borrow discipline: handle reads take a shared borrow, so they are safe
//! from inside any processor (the engine holds at most a shared borrow of
//! the store during a phase). `VeilStateHandle::subscribe` takes a mutable
//! borrow and is a boot-time operation; calling it from inside a running
//! phase would panic on the already-borrowed store.

use std::cell::RefCell;
use std::rc::Rc;

use core_events::{Event, PriorityEventQueue};
use core_veil::{Facet, StateListener, VeilState};

/// Bound under `space`: the Space's identity and its event front door.
pub struct SpaceHandle {
    space_id: String,
    queue: Rc<RefCell<PriorityEventQueue>>,
}

impl SpaceHandle {
    pub(crate) fn new(space_id: String, queue: Rc<RefCell<PriorityEventQueue>>) -> Self {
        Self { space_id, queue }
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    /// Queue an event for the next frame. Equivalent to `Space::enqueue`,
    /// usable by anything holding the handle.
    pub fn enqueue(&self, event: Event) {
        self.queue.borrow_mut().push(event);
    }

    pub fn pending_events(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl std::fmt::Debug for SpaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceHandle")
            .field("space_id", &self.space_id)
            .finish()
    }
}

/// Bound under `veil-state`: shared read-only access to the store.
pub struct VeilStateHandle {
    state: Rc<RefCell<VeilState>>,
}

impl VeilStateHandle {
    pub(crate) fn new(state: Rc<RefCell<VeilState>>) -> Self {
        Self { state }
    }

    /// Run a closure over the live store. The borrow is shared; do not
    /// stash references past the closure.
    pub fn with<R>(&self, f: impl FnOnce(&VeilState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn current_sequence(&self) -> u64 {
        self.state.borrow().current_sequence()
    }

    pub fn has_facet(&self, id: &str) -> bool {
        self.state.borrow().has_facet(id)
    }

    /// Cloned snapshot of one facet, if live.
    pub fn facet(&self, id: &str) -> Option<Facet> {
        self.state.borrow().facet(id).cloned()
    }

    /// Register a state listener. Boot-time only (see module docs).
    pub fn subscribe(&self, listener: StateListener) {
        self.state.borrow_mut().subscribe(listener);
    }
}

impl std::fmt::Debug for VeilStateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VeilStateHandle").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Space;
    use core_events::ElementRef;
    use core_tree::{Component, Element, ReferenceRegistry};
    use serde_json::json;

    /// Component that depends on both core services: it reads the store and
    /// injects an event through the space handle once references resolve.
    struct CoreServiceUser {
        announced: bool,
    }

    impl Component for CoreServiceUser {
        fn type_name(&self) -> &'static str {
            "core-service-user"
        }
        fn required_references(&self) -> Vec<String> {
            vec!["space".to_string(), "veil-state".to_string()]
        }
        fn on_references_resolved(&mut self, refs: &ReferenceRegistry) -> anyhow::Result<()> {
            let space = refs
                .get::<SpaceHandle>("space")
                .ok_or_else(|| anyhow::anyhow!("`space` is not a space handle"))?;
            let veil = refs
                .get::<VeilStateHandle>("veil-state")
                .ok_or_else(|| anyhow::anyhow!("`veil-state` is not a state handle"))?;
            let sequence = veil.with(|state| state.current_sequence());
            space.enqueue(Event::new(
                "probe:resolved",
                ElementRef::new("user"),
                json!({ "sequenceAtResolve": sequence, "spaceId": space.space_id() }),
            ));
            self.announced = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn core_services_resolve_and_are_usable() {
        let mut space = Space::new("space");
        assert!(space.references().contains("space"));
        assert!(space.references().contains("veil-state"));

        space
            .add_element("space", Element::new("user", "user"))
            .unwrap();
        space
            .add_component("user", Box::new(CoreServiceUser { announced: false }))
            .unwrap();
        space.resolve_references().unwrap();

        // The event injected through the handle reaches the next frame.
        assert!(space.has_pending_events());
        let summary = space.process_frame().await.unwrap();
        assert!(
            summary.processed_events >= 1,
            "handle-injected event consumed"
        );
        let frame_topics: Vec<String> = space
            .veil()
            .last_frame()
            .map(|f| f.events.iter().map(|e| e.topic.clone()).collect())
            .unwrap_or_default();
        assert!(frame_topics.contains(&"probe:resolved".to_string()));
    }

    #[tokio::test]
    async fn missing_core_service_type_mismatch_is_loud() {
        let mut space = Space::new("space");
        // A component requiring an absent reference still fails resolution.
        struct Needy;
        impl Component for Needy {
            fn type_name(&self) -> &'static str {
                "needy"
            }
            fn required_references(&self) -> Vec<String> {
                vec!["provider:absent".to_string()]
            }
        }
        space
            .add_element("space", Element::new("n", "needy"))
            .unwrap();
        space.add_component("n", Box::new(Needy)).unwrap();
        assert!(space.resolve_references().is_err());
    }
}
