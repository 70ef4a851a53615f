//! Built-in processors owned by the kernel itself.
//!
//! These run through the same RETM contracts as component processors but are
//! constructed by the Space at startup: built-in receptors run before
//! component receptors in phase 1, and the ephemeral cleanup transform runs
//! after component transforms in every phase-2 iteration.

use core_events::{Event, topics};
use core_pipeline::{Receptor, Transform};
use core_veil::{Facet, VeilDelta, VeilState, facet_types};

/// Removes every ephemeral facet that has survived one effector-visible
/// frame. Because it runs last in each phase-2 iteration, a one-shot facet
/// created in frame N is observable to effectors exactly once (frame N) and
/// gone during frame N+1.
#[derive(Debug, Default)]
pub struct EphemeralCleanup;

impl Transform for EphemeralCleanup {
    fn process(&mut self, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        let expired = state.expired_ephemerals(state.current_sequence());
        if !expired.is_empty() {
            tracing::debug!(target: "space.frame", count = expired.len(), "ephemeral_cleanup");
        }
        Ok(expired.into_iter().map(VeilDelta::remove).collect())
    }
}

/// Materializes `system:error` events into durable diagnostic facets so
/// processor faults are visible in the world model, not only in logs.
#[derive(Debug, Default)]
pub struct SystemErrorReceptor {
    emitted: u64,
}

impl Receptor for SystemErrorReceptor {
    fn topics(&self) -> Vec<String> {
        vec![topics::SYSTEM_ERROR.to_string()]
    }

    fn transform(&mut self, event: &Event, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        self.emitted += 1;
        let kind = event.payload_str("kind").unwrap_or("unknown");
        let detail = event.payload_str("detail").unwrap_or_default();
        let facet = Facet::new(
            format!("error-{}-{}", state.current_sequence(), self.emitted),
            facet_types::EVENT,
        )
        .with_content(detail)
        .with_attribute("kind", serde_json::json!(kind))
        .with_entity("element", event.source.element_id.clone());
        Ok(vec![VeilDelta::add(facet)])
    }
}

/// Compat receptor for the `veil:operation` topic: the event payload carries
/// a raw delta (either directly or under an `operation` key) to apply in the
/// next frame. `addFacet` of a live id degrades to a rewrite, so repeated
/// declarations behave as upserts.
#[derive(Debug, Default)]
pub struct VeilOperationReceptor;

impl Receptor for VeilOperationReceptor {
    fn topics(&self) -> Vec<String> {
        vec![topics::VEIL_OPERATION.to_string()]
    }

    fn transform(&mut self, event: &Event, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        let raw = event
            .payload
            .get("operation")
            .unwrap_or(&event.payload)
            .clone();
        let delta: VeilDelta = serde_json::from_value(raw)
            .map_err(|e| anyhow::anyhow!("malformed veil:operation payload: {e}"))?;
        let delta = match delta {
            VeilDelta::AddFacet { facet } if state.has_facet(&facet.id) => {
                VeilDelta::RewriteFacet {
                    id: facet.id.clone(),
                    content: facet.content.clone(),
                    state: facet.state.clone(),
                    aspects: Some(facet.aspects.clone()),
                    ephemeral: Some(facet.ephemeral),
                }
            }
            other => other,
        };
        Ok(vec![delta])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::ElementRef;
    use serde_json::json;

    #[test]
    fn cleanup_emits_removals_only_for_expired_ephemerals() {
        let mut state = VeilState::new();
        let seq = state.next_sequence();
        state
            .apply_deltas(
                &[
                    VeilDelta::add(Facet::new("old", "agent-activation").ephemeral()),
                    VeilDelta::add(Facet::new("keep", "state")),
                ],
                seq,
            )
            .unwrap();
        // Same frame: nothing expires.
        let mut cleanup = EphemeralCleanup;
        assert!(cleanup.process(&state).unwrap().is_empty());
        // Next frame: the ephemeral goes.
        state.next_sequence();
        let deltas = cleanup.process(&state).unwrap();
        assert_eq!(deltas, vec![VeilDelta::remove("old")]);
    }

    #[test]
    fn system_error_receptor_builds_unique_diagnostic_facets() {
        let mut state = VeilState::new();
        state.next_sequence();
        let mut receptor = SystemErrorReceptor::default();
        let event = core_events::system_error_event(
            ElementRef::new("widget-1"),
            "effector-error",
            "boom",
        );
        let d1 = receptor.transform(&event, &state).unwrap();
        let d2 = receptor.transform(&event, &state).unwrap();
        let (id1, id2) = (d1[0].facet_id().to_string(), d2[0].facet_id().to_string());
        assert_ne!(id1, id2);
        match &d1[0] {
            VeilDelta::AddFacet { facet } => {
                assert_eq!(facet.facet_type, "event");
                assert_eq!(facet.attribute("kind"), Some(&json!("effector-error")));
                assert_eq!(facet.content.as_deref(), Some("boom"));
                assert_eq!(facet.aspects.entity_id.as_deref(), Some("widget-1"));
            }
            other => panic!("expected addFacet, got {other:?}"),
        }
    }

    #[test]
    fn veil_operation_upserts_live_ids() {
        let mut state = VeilState::new();
        state
            .apply_deltas(&[VeilDelta::add(Facet::new("f", "state"))], 1)
            .unwrap();
        let mut receptor = VeilOperationReceptor;
        let payload = json!({ "operation": {
            "type": "addFacet",
            "facet": { "id": "f", "type": "state", "content": "updated" }
        }});
        let event = Event::new(topics::VEIL_OPERATION, ElementRef::new("root"), payload);
        let deltas = receptor.transform(&event, &state).unwrap();
        assert!(matches!(&deltas[0], VeilDelta::RewriteFacet { id, .. } if id == "f"));

        // Fresh id stays an add; payload may also be the bare delta.
        let event = Event::new(
            topics::VEIL_OPERATION,
            ElementRef::new("root"),
            json!({ "type": "addFacet", "facet": { "id": "g", "type": "state" } }),
        );
        let deltas = receptor.transform(&event, &state).unwrap();
        assert!(matches!(&deltas[0], VeilDelta::AddFacet { .. }));
    }

    #[test]
    fn malformed_veil_operation_is_a_processor_fault() {
        let state = VeilState::new();
        let mut receptor = VeilOperationReceptor;
        let event = Event::new(
            topics::VEIL_OPERATION,
            ElementRef::new("root"),
            json!({ "operation": { "type": "noSuchOp" } }),
        );
        assert!(receptor.transform(&event, &state).is_err());
    }
}
