//! Deterministic restoration: newest snapshot, then delta replay, then
//! element materialization.
//!
//! The sequence is exact:
//! 1. load the newest snapshot (highest sequence, filename timestamp
//!    tiebreak) — a malformed snapshot is an error, not a fresh start;
//! 2. restore the VEIL state and rebuild the element tree, creating
//!    components through the registry (`on_init` + `on_restore`; `on_mount`
//!    deferred);
//! 3. replay every delta with a higher sequence in the same lifecycle
//!    straight through `apply_frame` — no RETM pipeline, no event dispatch;
//! 4. materialize elements implied by active `element-tree` facets that were
//!    not in the snapshot;
//! 5. leave restoration mode, resolve references, flush deferred mounts.

use std::rc::Rc;

use core_persist::FileStorage;
use core_tree::{ComponentRegistry, Element, LifecycleCtx};
use core_veil::facet_types;
use serde_json::Value;

use crate::persistence::PersistenceMaintainer;
use crate::space::Space;

/// What a restoration did, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    pub snapshot_sequence: u64,
    pub replayed_frames: usize,
    pub materialized_elements: usize,
}

/// Restore a Space from storage. `Ok(None)` means no snapshot exists and the
/// caller should bootstrap fresh; any storage or schema failure is an error
/// (silent data loss is worse than refusing to start).
///
/// The returned Space has left restoration mode but has not resolved
/// references yet: the host registers its bindings (providers, secrets, core
/// services) and then calls [`Space::complete_restoration`], which resolves
/// references and flushes the deferred `on_mount` calls.
pub async fn restore_space(
    storage: Rc<FileStorage>,
    lifecycle_id: u64,
    snapshot_interval: u64,
    component_types: ComponentRegistry,
) -> anyhow::Result<Option<(Space, RestoreReport)>> {
    let Some(snapshot) = storage.latest_snapshot().await? else {
        return Ok(None);
    };
    if snapshot.lifecycle_id != lifecycle_id {
        anyhow::bail!(
            "snapshot lifecycle {} does not match current lifecycle {lifecycle_id}",
            snapshot.lifecycle_id
        );
    }
    tracing::info!(
        target: "persist.restore",
        sequence = snapshot.sequence,
        lifecycle_id,
        "restoring_from_snapshot"
    );

    let mut space = Space::new(snapshot.space_id.clone());
    space.restoring = true;
    space.component_types = component_types;
    space.attach_persistence(PersistenceMaintainer::new(
        Rc::clone(&storage),
        lifecycle_id,
        snapshot_interval,
    ));
    space.veil.borrow_mut().set_state(snapshot.veil_state);

    // Rebuild the tree. Nodes are stored parents-first, so one pass suffices.
    for node in &snapshot.element_tree.nodes {
        match &node.parent {
            None => {
                let root = space
                    .tree
                    .get_mut(&node.id)
                    .ok_or_else(|| anyhow::anyhow!("snapshot root `{}` is not the space root", node.id))?;
                root.active = node.active;
                for pattern in &node.subscriptions {
                    root.subscribe(pattern.clone());
                }
            }
            Some(parent) => {
                let mut element = Element::new(node.id.clone(), node.name.clone());
                element.active = node.active;
                for pattern in &node.subscriptions {
                    element.subscribe(pattern.clone());
                }
                space.add_element(parent, element)?;
            }
        }
        for snap in &node.components {
            let Some(registered_version) = space.component_types.version_of(&snap.type_name)
            else {
                tracing::warn!(
                    target: "persist.restore",
                    component = snap.type_name.as_str(),
                    element = node.id.as_str(),
                    "unregistered_component_type_skipped"
                );
                continue;
            };
            if snap.version > registered_version {
                anyhow::bail!(
                    "component `{}` persisted at serializer version {} but only {} is registered",
                    snap.type_name,
                    snap.version,
                    registered_version
                );
            }
            let mut component = space
                .component_types
                .create(&snap.type_name, snap.config.as_ref())?;
            if let Some(state) = &snap.state {
                component.apply_persistent_state(state.clone())?;
            }
            let index =
                space.add_component_with_config(&node.id, component, snap.config.clone())?;
            if !snap.enabled
                && let Some(element) = space.tree.get_mut(&node.id)
                && let Some(slot) = element.component_mut(index)
            {
                slot.enabled = false;
            }
        }
    }

    // Replay deltas past the snapshot, directly against the store.
    let deltas = storage.deltas_after(snapshot.sequence, lifecycle_id).await?;
    for delta in &deltas {
        space.veil.borrow_mut().apply_frame(&delta.frame)?;
    }

    // Materialize elements implied by element-tree facets the snapshot did
    // not carry (created after it, before the crash). Parents may themselves
    // be materialized facets, so iterate to quiescence.
    let mut materialized = 0usize;
    loop {
        let veil = space.veil.borrow();
        let missing: Vec<(String, String, String, Vec<String>, Vec<(String, Option<Value>)>)> =
            veil
                .facets_of_type(facet_types::ELEMENT_TREE)
                .filter_map(|facet| {
                    let state = facet.state.as_ref()?;
                    if state.get("active") != Some(&Value::Bool(true)) {
                        return None;
                    }
                    let element_id = state.get("elementId")?.as_str()?.to_string();
                    if space.tree.contains(&element_id) {
                        return None;
                    }
                    let name = state.get("name")?.as_str()?.to_string();
                    let parent = state
                        .get("parentId")
                        .and_then(Value::as_str)
                        .unwrap_or("root")
                        .to_string();
                    let subscriptions = state
                        .get("subscriptions")
                        .and_then(Value::as_array)
                        .map(|subs| {
                            subs.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    let components = state
                        .get("components")
                        .and_then(Value::as_array)
                        .map(|specs| {
                            specs
                                .iter()
                                .filter_map(|spec| {
                                    Some((
                                        spec.get("type")?.as_str()?.to_string(),
                                        spec.get("config").cloned(),
                                    ))
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    Some((element_id, name, parent, subscriptions, components))
                })
                .collect();
        drop(veil);

        let mut progressed = false;
        for (element_id, name, parent, subscriptions, components) in missing {
            let parent_id = if parent == "root" {
                space.tree.root_id().to_string()
            } else {
                parent
            };
            if !space.tree.contains(&parent_id) {
                continue; // maybe created by a later pass
            }
            let mut element = Element::new(element_id.clone(), name);
            for pattern in subscriptions {
                element.subscribe(pattern);
            }
            space.add_element(&parent_id, element)?;
            for (type_name, config) in components {
                if !space.component_types.contains(&type_name) {
                    tracing::warn!(
                        target: "persist.restore",
                        component = type_name.as_str(),
                        element = element_id.as_str(),
                        "unregistered_component_type_skipped"
                    );
                    continue;
                }
                let component = space.component_types.create(&type_name, config.as_ref())?;
                space.add_component_with_config(&element_id, component, config)?;
            }
            materialized += 1;
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    space.restoring = false;
    if let Some(p) = space.persistence.as_mut() {
        p.set_frames_since_snapshot(deltas.len() as u64);
    }

    let report = RestoreReport {
        snapshot_sequence: snapshot.sequence,
        replayed_frames: deltas.len(),
        materialized_elements: materialized,
    };
    tracing::info!(
        target: "persist.restore",
        sequence = space.veil.borrow().current_sequence(),
        replayed = report.replayed_frames,
        materialized = report.materialized_elements,
        "restore_complete"
    );
    Ok(Some((space, report)))
}

impl Space {
    /// Final restoration step, run after the host has registered its
    /// references: resolve them across the rebuilt tree, then flush the
    /// `on_mount` calls deferred while restoring.
    pub fn complete_restoration(&mut self) -> anyhow::Result<()> {
        self.resolve_references()?;
        self.run_deferred_mounts();
        Ok(())
    }

    /// Flush `on_mount` calls deferred during restoration. Emitted events go
    /// to the queue for the first post-restore frame.
    pub(crate) fn run_deferred_mounts(&mut self) {
        let deferred = std::mem::take(&mut self.deferred_mounts);
        for pref in deferred {
            let path = self.tree.path_of(&pref.element_id);
            let mut events = Vec::new();
            if let Some(element) = self.tree.get_mut(&pref.element_id)
                && let Some(slot) = element.component_mut(pref.component_index)
            {
                let mut ctx = LifecycleCtx::new(&pref.element_id, &path, &mut events);
                if let Err(e) = slot.component.on_mount(&mut ctx) {
                    tracing::warn!(
                        target: "persist.restore",
                        element = pref.element_id.as_str(),
                        component = slot.type_name.as_str(),
                        error = %e,
                        "deferred_mount_failed"
                    );
                }
            }
            for event in events {
                self.queue.borrow_mut().push(event);
            }
        }
    }
}
