//! The Space: construction, tree/component management, registries, and the
//! operations that live outside the frame loop (outgoing frames, rendered
//! contexts, recovery, shutdown).

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use core_events::{Event, PriorityEventQueue, QueueDebugInfo, topics};
use core_persist::DeletionRecord;
use core_pipeline::{ExternalAction, Receptor, Transform};
use core_tree::{
    Component, ComponentRegistry, Element, ReferenceRegistry, RoleSet, Tree,
};
use core_veil::{
    AgentInfo, FacetChange, Frame, StreamRef, VeilDelta, VeilState, iso_timestamp,
};
use serde_json::Value;

use crate::RENDERED_CONTEXT_CAP;
use crate::builtins::{EphemeralCleanup, SystemErrorReceptor, VeilOperationReceptor};
use crate::debug::{
    DebugObserver, FrameContext, RenderedContextInfo, RenderedContextLog,
};
use crate::handles::{SpaceHandle, VeilStateHandle};
use crate::metrics::{FrameMetrics, FrameMetricsSnapshot};
use crate::persistence::PersistenceMaintainer;
use crate::tree_maintainer::{ElementRequestReceptor, element_tree_facet};

/// Address of a component inside the tree, used by the RETM role
/// registries. A ref whose element has since been destroyed is skipped and
/// pruned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorRef {
    pub element_id: String,
    pub component_index: usize,
}

/// What one `process_frame` call did, for the run loop and tests.
#[derive(Debug, Default)]
pub struct FrameSummary {
    pub sequence: Option<u64>,
    pub processed_events: usize,
    pub phase2_iterations: usize,
    pub external_actions: Vec<ExternalAction>,
    pub skipped: bool,
    pub pending_events: usize,
}

pub struct Space {
    pub(crate) id: String,
    pub(crate) lifecycle_id: u64,
    /// Shared with `VeilStateHandle`; the Space stays the only mutator.
    pub(crate) veil: Rc<RefCell<VeilState>>,
    pub(crate) tree: Tree,
    /// Shared with `SpaceHandle` so external holders can inject events.
    pub(crate) queue: Rc<RefCell<PriorityEventQueue>>,
    pub(crate) references: ReferenceRegistry,
    pub(crate) component_types: ComponentRegistry,
    pub(crate) receptors: Vec<ProcessorRef>,
    pub(crate) transforms: Vec<ProcessorRef>,
    pub(crate) effectors: Vec<ProcessorRef>,
    pub(crate) maintainers: Vec<ProcessorRef>,
    pub(crate) modulators: Vec<ProcessorRef>,
    pub(crate) builtin_receptors: Vec<Box<dyn Receptor>>,
    pub(crate) builtin_tail_transforms: Vec<Box<dyn Transform>>,
    pub(crate) observers: Vec<Rc<dyn DebugObserver>>,
    pub(crate) rendered: RenderedContextLog,
    pub(crate) metrics: FrameMetrics,
    pub(crate) persistence: Option<PersistenceMaintainer>,
    pub(crate) processing: bool,
    pub(crate) restoring: bool,
    pub(crate) references_resolved: bool,
    pub(crate) pending_first_frame: Vec<ProcessorRef>,
    pub(crate) deferred_mounts: Vec<ProcessorRef>,
    pub(crate) carryover_changes: Vec<FacetChange>,
    pub(crate) pending_rendered: Option<Value>,
    pub(crate) pending_element_declarations: Vec<String>,
    pub(crate) active_stream: Option<StreamRef>,
}

impl Space {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let veil = Rc::new(RefCell::new(VeilState::new()));
        let queue = Rc::new(RefCell::new(PriorityEventQueue::new()));
        // Core services are bound before any host registration.
        let mut references = ReferenceRegistry::new();
        references.insert_value("space", SpaceHandle::new(id.clone(), Rc::clone(&queue)));
        references.insert_value("veil-state", VeilStateHandle::new(Rc::clone(&veil)));
        Self {
            tree: Tree::new(Element::new(id.clone(), "space")),
            id,
            lifecycle_id: 0,
            veil,
            queue,
            references,
            component_types: ComponentRegistry::new(),
            receptors: Vec::new(),
            transforms: Vec::new(),
            effectors: Vec::new(),
            maintainers: Vec::new(),
            modulators: Vec::new(),
            builtin_receptors: vec![
                Box::new(SystemErrorReceptor::default()),
                Box::new(VeilOperationReceptor),
                Box::new(ElementRequestReceptor::default()),
            ],
            builtin_tail_transforms: vec![Box::new(EphemeralCleanup)],
            observers: Vec::new(),
            rendered: RenderedContextLog::new(RENDERED_CONTEXT_CAP),
            metrics: FrameMetrics::default(),
            persistence: None,
            processing: false,
            restoring: false,
            references_resolved: false,
            pending_first_frame: Vec::new(),
            deferred_mounts: Vec::new(),
            carryover_changes: Vec::new(),
            pending_rendered: None,
            pending_element_declarations: Vec::new(),
            active_stream: None,
        }
    }

    // ---- identity & accessors -------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lifecycle_id(&self) -> u64 {
        self.lifecycle_id
    }

    /// Borrowed read view of the store. Bind the guard when the borrow must
    /// outlive one expression.
    pub fn veil(&self) -> Ref<'_, VeilState> {
        self.veil.borrow()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn references(&self) -> &ReferenceRegistry {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut ReferenceRegistry {
        &mut self.references
    }

    pub fn component_types(&self) -> &ComponentRegistry {
        &self.component_types
    }

    pub fn component_types_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.component_types
    }

    pub fn metrics(&self) -> FrameMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn queue_debug_info(&self) -> QueueDebugInfo {
        self.queue.borrow().debug_info()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    pub fn set_active_stream(&mut self, stream: Option<StreamRef>) {
        self.active_stream = stream;
    }

    pub fn register_agent(&mut self, agent: AgentInfo) {
        self.veil.borrow_mut().register_agent(agent);
    }

    pub fn register_stream(&mut self, stream: core_veil::Stream) {
        self.veil.borrow_mut().register_stream(stream);
    }

    pub fn attach_persistence(&mut self, maintainer: PersistenceMaintainer) {
        self.lifecycle_id = maintainer.lifecycle_id();
        self.persistence = Some(maintainer);
    }

    pub fn persistence(&self) -> Option<&PersistenceMaintainer> {
        self.persistence.as_ref()
    }

    pub fn add_observer(&mut self, observer: Rc<dyn DebugObserver>) {
        self.observers.push(observer);
    }

    // ---- events ---------------------------------------------------------

    pub fn enqueue(&mut self, event: Event) {
        self.queue.borrow_mut().push(event);
    }

    // ---- tree management ------------------------------------------------

    /// Attach an element. Mount events are queued for the next frame and the
    /// durable `element-tree` facet is declared through the compat
    /// `veil:operation` path, exactly as the element-tree maintainer does
    /// for declarative creations. During restoration both are suppressed:
    /// the restored state already carries them.
    pub fn add_element(&mut self, parent_id: &str, element: Element) -> anyhow::Result<()> {
        let element_id = element.id.clone();
        let events = self.tree.add_child(parent_id, element)?;
        if !self.restoring {
            for event in events {
                self.queue.borrow_mut().push(event);
            }
            self.declare_element_facet(&element_id);
        }
        Ok(())
    }

    /// Attach a component and register every RETM role it implements.
    pub fn add_component(
        &mut self,
        element_id: &str,
        component: Box<dyn Component>,
    ) -> anyhow::Result<usize> {
        self.add_component_with_config(element_id, component, None)
    }

    pub fn add_component_with_config(
        &mut self,
        element_id: &str,
        component: Box<dyn Component>,
        config: Option<Value>,
    ) -> anyhow::Result<usize> {
        if self.references_resolved {
            self.check_component_requirements(component.as_ref())?;
        }
        let restoring = self.restoring;
        let (index, roles, events) =
            self.tree
                .add_component(element_id, component, config, restoring)?;
        let pref = ProcessorRef {
            element_id: element_id.to_string(),
            component_index: index,
        };
        self.register_roles(&pref, roles);
        self.pending_first_frame.push(pref.clone());
        if restoring {
            self.deferred_mounts.push(pref);
        } else {
            for event in events {
                self.queue.borrow_mut().push(event);
            }
            self.declare_element_facet(element_id);
        }
        if self.references_resolved {
            let Self {
                tree, references, ..
            } = self;
            if let Some(element) = tree.get_mut(element_id)
                && let Some(slot) = element.component_mut(index)
            {
                slot.component.on_references_resolved(references)?;
            }
        }
        Ok(index)
    }

    pub fn set_component_enabled(
        &mut self,
        element_id: &str,
        index: usize,
        enabled: bool,
    ) -> anyhow::Result<()> {
        let events = self.tree.set_component_enabled(element_id, index, enabled)?;
        for event in events {
            self.queue.borrow_mut().push(event);
        }
        Ok(())
    }

    pub(crate) fn register_roles(&mut self, pref: &ProcessorRef, roles: RoleSet) {
        if roles.modulator {
            self.modulators.push(pref.clone());
        }
        if roles.receptor {
            self.receptors.push(pref.clone());
        }
        if roles.transform {
            self.transforms.push(pref.clone());
        }
        if roles.effector {
            self.effectors.push(pref.clone());
        }
        if roles.maintainer {
            self.maintainers.push(pref.clone());
        }
    }

    /// Drop registrations whose element no longer exists.
    pub(crate) fn prune_registrations(&mut self) {
        let tree = &self.tree;
        let live = |pref: &ProcessorRef| tree.contains(&pref.element_id);
        self.modulators.retain(live);
        self.receptors.retain(live);
        self.transforms.retain(live);
        self.effectors.retain(live);
        self.maintainers.retain(live);
        self.pending_first_frame.retain(live);
    }

    /// Mark the element's durable `element-tree` facet for declaration.
    /// Declarations are deduplicated and flushed lazily at the next frame's
    /// setup, so an element assembled by several calls (add element, then
    /// components) is declared once, with its settled component list.
    /// Skipped for the root: the Space itself is not described by a facet.
    fn declare_element_facet(&mut self, element_id: &str) {
        if element_id == self.tree.root_id() {
            return;
        }
        let element_id = element_id.to_string();
        if !self.pending_element_declarations.contains(&element_id) {
            self.pending_element_declarations.push(element_id);
        }
    }

    /// Turn pending declarations into `veil:operation` upsert events, one
    /// per element, built from the tree as it stands now.
    pub(crate) fn flush_element_declarations(&mut self) {
        let pending = std::mem::take(&mut self.pending_element_declarations);
        for element_id in pending {
            if let Some(facet) = element_tree_facet(&self.tree, &element_id) {
                let payload = serde_json::json!({
                    "operation": { "type": "addFacet", "facet": facet }
                });
                self.queue.borrow_mut().push(Event::new(
                    topics::VEIL_OPERATION,
                    self.tree.ref_of(self.tree.root_id()),
                    payload,
                ));
            }
        }
    }

    // ---- reference resolution -------------------------------------------

    fn check_component_requirements(&self, component: &dyn Component) -> anyhow::Result<()> {
        for key in component.required_references() {
            if !self.references.contains(&key) {
                anyhow::bail!(
                    "component `{}` requires missing reference `{key}`",
                    component.type_name()
                );
            }
        }
        for key in component.required_externals() {
            if !self.references.contains(&key) {
                anyhow::bail!(
                    "component `{}` requires missing external resource `{key}`",
                    component.type_name()
                );
            }
        }
        Ok(())
    }

    /// Three-pass dependency resolution over every mounted component:
    /// validate required references, validate required externals, then
    /// notify `on_references_resolved`. Any missing requirement is fatal.
    pub fn resolve_references(&mut self) -> anyhow::Result<()> {
        let slots: Vec<(String, usize)> = self
            .tree
            .ids()
            .into_iter()
            .map(str::to_string)
            .flat_map(|id| {
                let count = self
                    .tree
                    .get(&id)
                    .map(|e| e.components().len())
                    .unwrap_or(0);
                (0..count).map(move |i| (id.clone(), i)).collect::<Vec<_>>()
            })
            .collect();

        for (element_id, index) in &slots {
            let slot = self
                .tree
                .get(element_id)
                .and_then(|e| e.component(*index))
                .expect("slot enumerated above");
            for key in slot.component.required_references() {
                if !self.references.contains(&key) {
                    anyhow::bail!(
                        "component `{}` on element `{element_id}` requires missing reference `{key}`",
                        slot.type_name
                    );
                }
            }
        }
        for (element_id, index) in &slots {
            let slot = self
                .tree
                .get(element_id)
                .and_then(|e| e.component(*index))
                .expect("slot enumerated above");
            for key in slot.component.required_externals() {
                if !self.references.contains(&key) {
                    anyhow::bail!(
                        "component `{}` on element `{element_id}` requires missing external resource `{key}`",
                        slot.type_name
                    );
                }
            }
        }
        {
            let Self {
                tree, references, ..
            } = self;
            for (element_id, index) in &slots {
                if let Some(element) = tree.get_mut(element_id)
                    && let Some(slot) = element.component_mut(*index)
                {
                    slot.component.on_references_resolved(references)?;
                }
            }
        }
        self.references_resolved = true;
        tracing::info!(target: "space.references", components = slots.len(), "references_resolved");
        Ok(())
    }

    // ---- agent & debug surfaces -----------------------------------------

    /// Record a frame produced by an agent: applied to the store, persisted,
    /// and announced to observers. Its facet changes surface to effectors in
    /// the next processed frame.
    pub async fn record_outgoing_frame(
        &mut self,
        deltas: Vec<VeilDelta>,
        agent: &AgentInfo,
        active_stream: Option<StreamRef>,
    ) -> anyhow::Result<Frame> {
        let (frame, changes) = self
            .veil
            .borrow_mut()
            .record_outgoing_frame(deltas, agent, active_stream)?;
        self.metrics.outgoing_frame();
        let ctx = FrameContext {
            space_id: &self.id,
            lifecycle_id: self.lifecycle_id,
        };
        for observer in &self.observers {
            observer.on_outgoing_frame(&frame, &ctx);
        }
        if let Some(persistence) = self.persistence.as_mut()
            && let Err(e) = persistence
                .record_frame(
                    &frame,
                    None,
                    None,
                    &self.veil.borrow(),
                    &self.tree,
                    &self.component_types,
                    &self.id,
                )
                .await
        {
            tracing::error!(target: "persist.io", error = %e, "outgoing_frame_persist_failed");
        }
        self.carryover_changes.extend(changes);
        Ok(frame)
    }

    /// Retain the prompt rendered for `sequence` in the bounded LRU and
    /// notify observers; it also rides along on the frame's delta file.
    pub fn record_rendered_context(
        &mut self,
        sequence: u64,
        rendered: impl Into<String>,
        meta: Value,
    ) {
        let info = RenderedContextInfo {
            sequence,
            rendered: rendered.into(),
            meta: meta.clone(),
            timestamp: iso_timestamp(),
        };
        for observer in &self.observers {
            observer.on_rendered_context(&info);
        }
        self.pending_rendered = Some(serde_json::json!({
            "rendered": info.rendered.clone(),
            "meta": meta,
        }));
        self.rendered.record(info);
    }

    pub fn rendered_context(&self, sequence: u64) -> Option<&RenderedContextInfo> {
        self.rendered.get(sequence)
    }

    // ---- recovery & shutdown --------------------------------------------

    /// Delete recent frames: pre-snapshot, truncate in-memory history and
    /// on-disk delta files from `from_sequence`, post-snapshot, audit
    /// record. Idempotent.
    pub async fn delete_recent_frames(
        &mut self,
        from_sequence: u64,
    ) -> anyhow::Result<DeletionRecord> {
        if let Some(p) = self.persistence.as_mut() {
            p.snapshot_now(&self.veil.borrow(), &self.tree, &self.component_types, &self.id)
                .await?;
        }
        let removed_frames = self.veil.borrow_mut().delete_recent_frames(from_sequence);
        let removed_delta_files = match self.persistence.as_ref() {
            Some(p) => p.storage().remove_deltas_from(from_sequence).await?,
            None => Vec::new(),
        };
        let record = DeletionRecord {
            from_sequence,
            removed_frames,
            removed_delta_files,
            timestamp: iso_timestamp(),
            lifecycle_id: self.lifecycle_id,
        };
        if let Some(p) = self.persistence.as_mut() {
            p.snapshot_now(&self.veil.borrow(), &self.tree, &self.component_types, &self.id)
                .await?;
            p.storage().write_deletion_record(&record).await?;
        }
        Ok(record)
    }

    /// Graceful termination: one final snapshot when persistence is on.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        tracing::info!(
            target: "space",
            sequence = self.veil.borrow().current_sequence(),
            "shutdown"
        );
        if let Some(p) = self.persistence.as_mut() {
            p.snapshot_now(&self.veil.borrow(), &self.tree, &self.component_types, &self.id)
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("id", &self.id)
            .field("lifecycle_id", &self.lifecycle_id)
            .field("veil", &self.veil.borrow())
            .field("tree", &self.tree)
            .field("queue", &self.queue.borrow().len())
            .field("processing", &self.processing)
            .field("restoring", &self.restoring)
            .finish()
    }
}
