//! The component contract: lifecycle hooks, dependency declaration,
//! persistence surface, and RETM role probing.

use core_events::{ElementRef, Event};
use core_pipeline::{Effector, Maintainer, Modulator, Receptor, Transform};
use serde_json::Value;

use crate::references::ReferenceRegistry;

/// Context handed to lifecycle hooks and event handlers. Hooks communicate
/// with the rest of the world only by emitting events for the next frame.
pub struct LifecycleCtx<'a> {
    pub element_id: &'a str,
    pub element_path: &'a [String],
    events: &'a mut Vec<Event>,
}

impl<'a> LifecycleCtx<'a> {
    pub fn new(element_id: &'a str, element_path: &'a [String], events: &'a mut Vec<Event>) -> Self {
        Self {
            element_id,
            element_path,
            events,
        }
    }

    /// Queue an event for the next frame.
    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// An `ElementRef` for the hosting element, suitable as an event source.
    pub fn source_ref(&self) -> ElementRef {
        ElementRef::new(self.element_id).with_path(self.element_path.to_vec())
    }
}

/// A mounted behavior. All hooks default to no-ops so simple components
/// implement only what they use; RETM participation is declared by
/// overriding the matching `as_*` accessor to return `self`.
pub trait Component {
    /// Stable type name; key into the component registry for declarative
    /// creation and restoration.
    fn type_name(&self) -> &'static str;

    // -- lifecycle --------------------------------------------------------

    fn on_init(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called instead of `on_mount` when the component is being rebuilt
    /// from a snapshot; `on_mount` follows once restoration completes.
    fn on_restore(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_mount(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_unmount(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_enable(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_disable(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once, at the start of the first frame this component
    /// participates in.
    fn on_first_frame(&mut self, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    // -- tree event dispatch ---------------------------------------------

    fn handle_event(&mut self, _event: &mut Event, _ctx: &mut LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    // -- dependency declaration ------------------------------------------

    /// Keys this component requires in the reference registry. Missing keys
    /// are fatal at boot or dynamic load.
    fn required_references(&self) -> Vec<String> {
        Vec::new()
    }

    /// Typed external resource paths (`secret:<name>`, `provider:<name>`).
    fn required_externals(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_references_resolved(&mut self, _refs: &ReferenceRegistry) -> anyhow::Result<()> {
        Ok(())
    }

    // -- persistence ------------------------------------------------------

    /// Persistent properties, serialized into snapshots. `None` means the
    /// component is stateless across restarts.
    fn persistent_state(&self) -> Option<Value> {
        None
    }

    fn apply_persistent_state(&mut self, _state: Value) -> anyhow::Result<()> {
        Ok(())
    }

    // -- RETM role probing ------------------------------------------------

    fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
        None
    }

    fn as_transform(&mut self) -> Option<&mut dyn Transform> {
        None
    }

    fn as_effector(&mut self) -> Option<&mut dyn Effector> {
        None
    }

    fn as_maintainer(&mut self) -> Option<&mut dyn Maintainer> {
        None
    }

    fn as_modulator(&mut self) -> Option<&mut dyn Modulator> {
        None
    }
}

/// Which RETM roles a component implements, discovered by structural probing
/// when the component is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleSet {
    pub receptor: bool,
    pub transform: bool,
    pub effector: bool,
    pub maintainer: bool,
    pub modulator: bool,
}

impl RoleSet {
    pub fn probe(component: &mut dyn Component) -> Self {
        Self {
            receptor: component.as_receptor().is_some(),
            transform: component.as_transform().is_some(),
            effector: component.as_effector().is_some(),
            maintainer: component.as_maintainer().is_some(),
            modulator: component.as_modulator().is_some(),
        }
    }

    pub fn any(&self) -> bool {
        self.receptor || self.transform || self.effector || self.maintainer || self.modulator
    }
}

/// A component mounted on an element, together with its attachment metadata.
pub struct ComponentSlot {
    pub type_name: String,
    pub config: Option<Value>,
    pub enabled: bool,
    pub roles: RoleSet,
    pub component: Box<dyn Component>,
}

impl ComponentSlot {
    pub fn new(mut component: Box<dyn Component>, config: Option<Value>) -> Self {
        let roles = RoleSet::probe(component.as_mut());
        Self {
            type_name: component.type_name().to_string(),
            config,
            enabled: true,
            roles,
            component,
        }
    }
}

impl std::fmt::Debug for ComponentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSlot")
            .field("type_name", &self.type_name)
            .field("enabled", &self.enabled)
            .field("roles", &self.roles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_pipeline::FacetFilter;
    use core_veil::{FacetChange, VeilDelta, VeilState};

    #[derive(Default)]
    struct DualRole;

    impl Receptor for DualRole {
        fn topics(&self) -> Vec<String> {
            vec!["x:*".into()]
        }
        fn transform(
            &mut self,
            _event: &Event,
            _state: &VeilState,
        ) -> anyhow::Result<Vec<VeilDelta>> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait(?Send)]
    impl Effector for DualRole {
        fn facet_filters(&self) -> Vec<FacetFilter> {
            Vec::new()
        }
        async fn process(
            &mut self,
            _changes: &[FacetChange],
            _state: &VeilState,
        ) -> anyhow::Result<core_pipeline::EffectorOutput> {
            Ok(core_pipeline::EffectorOutput::none())
        }
    }

    impl Component for DualRole {
        fn type_name(&self) -> &'static str {
            "dual-role"
        }
        fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
            Some(self)
        }
        fn as_effector(&mut self) -> Option<&mut dyn Effector> {
            Some(self)
        }
    }

    struct Inert;

    impl Component for Inert {
        fn type_name(&self) -> &'static str {
            "inert"
        }
    }

    #[test]
    fn probing_discovers_each_implemented_role() {
        let mut c = DualRole;
        let roles = RoleSet::probe(&mut c);
        assert!(roles.receptor);
        assert!(roles.effector);
        assert!(!roles.transform);
        assert!(!roles.maintainer);
        assert!(!roles.modulator);
        assert!(roles.any());

        let mut inert = Inert;
        assert!(!RoleSet::probe(&mut inert).any());
    }

    #[test]
    fn slot_captures_type_name_and_roles() {
        let slot = ComponentSlot::new(Box::new(DualRole), Some(serde_json::json!({ "k": 1 })));
        assert_eq!(slot.type_name, "dual-role");
        assert!(slot.enabled);
        assert!(slot.roles.receptor && slot.roles.effector);
    }

    #[test]
    fn lifecycle_ctx_emits_into_the_sink() {
        let mut sink = Vec::new();
        let path = vec!["space".to_string(), "widget".to_string()];
        let mut ctx = LifecycleCtx::new("widget-1", &path, &mut sink);
        let src = ctx.source_ref();
        ctx.emit(Event::new("probe:hit", src, serde_json::Value::Null));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].source.element_id, "widget-1");
        assert_eq!(sink[0].source.element_path, path);
    }
}
