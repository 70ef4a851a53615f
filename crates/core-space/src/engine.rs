//! The frame engine: one `process_frame` call advances the world by exactly
//! one frame.
//!
//! Phase structure and ordering guarantees:
//! - events are consumed in queue order (priority, then FIFO);
//! - receptors fire per event in registration order, built-ins first; all
//!   phase-1 deltas apply as one batch, so every receptor sees the same
//!   snapshot;
//! - transforms run in registration order inside a collect-then-apply
//!   fixed-point loop bounded by `MAX_PHASE2_ITERATIONS`, with the ephemeral
//!   cleanup transform last in every iteration;
//! - effectors and maintainers fire in registration order and observe the
//!   frame's merged change log exactly once — trailing deltas returned by
//!   maintainers apply within the frame but surface to effectors via the
//!   next frame's change log;
//! - a processor fault becomes a high-priority `system:error` event (and a
//!   diagnostic facet next frame); a state-invariant violation rejects the
//!   offending batch whole and the frame continues.
//!
//! Borrow discipline: the store and the queue are shared (`Rc<RefCell<…>>`)
//! with the core-service handles. Each phase helper clones the `Rc` and
//! holds one shared borrow of the store for its duration — the snapshot the
//! processors see — and every mutation (`apply_deltas`, `commit_frame`,
//! queue pushes) takes its own short-lived borrow with no guard
//! outstanding.

use std::rc::Rc;
use std::time::Instant;

use core_events::{Event, ElementRef, system_error_event, topic_matches, topics};
use core_pipeline::filter_changes;
use core_veil::{FacetChange, Frame, VeilDelta};

use crate::MAX_PHASE2_ITERATIONS;
use crate::debug::{FrameCompletion, FrameContext};
use crate::space::{FrameSummary, Space};
use crate::tree_maintainer;

impl Space {
    /// Process one frame. Serial by contract: a call made while a frame is
    /// already processing is recorded and returns immediately, leaving the
    /// running pass to pick up whatever was queued.
    pub async fn process_frame(&mut self) -> anyhow::Result<FrameSummary> {
        if self.processing {
            self.metrics.reentrant_rejection();
            tracing::trace!(target: "space.frame", "reentrant_process_frame_rejected");
            return Ok(FrameSummary {
                skipped: true,
                ..FrameSummary::default()
            });
        }
        self.processing = true;
        let result = self.frame_pass().await;
        self.processing = false;
        result
    }

    async fn frame_pass(&mut self) -> anyhow::Result<FrameSummary> {
        let started = Instant::now();
        let space_id = self.id.clone();
        let lifecycle_id = self.lifecycle_id;
        let observers = self.observers.clone();
        let ctx = FrameContext {
            space_id: &space_id,
            lifecycle_id,
        };

        self.run_first_frame_hooks();
        self.flush_element_declarations();

        // Setup: allocate the frame identity and drain the queue.
        let sequence = self.veil.borrow_mut().next_sequence();
        let mut frame = Frame::new(sequence);
        frame.active_stream = self.active_stream.clone();
        tracing::debug!(target: "space.frame", sequence, "frame_start");
        for observer in &observers {
            observer.on_frame_start(&frame, &ctx);
        }

        let mut events = self.queue.borrow_mut().drain_all();
        let mut fault_events: Vec<Event> = Vec::new();

        // Admission gate (modulators), when any are registered.
        if !self.modulators.is_empty() {
            events = self.run_modulators(events);
        }
        frame.events = events.clone();
        for event in &events {
            for observer in &observers {
                observer.on_frame_event(&frame, event, &ctx);
            }
        }

        // Tree dispatch runs alongside RETM: broadcast or DOM-style
        // propagation per event; emitted events land in the next frame.
        for event in &events {
            let mut dispatched = event.clone();
            let emitted = if dispatched.broadcast {
                self.tree.dispatch_broadcast(&mut dispatched)
            } else {
                self.tree.dispatch_propagation(&mut dispatched)
            };
            for e in emitted {
                self.queue.borrow_mut().push(e);
            }
        }

        // Phase 1: receptors, collect-then-apply.
        let phase1_deltas = self.run_receptors(&events, &mut fault_events);
        let mut all_changes: Vec<FacetChange> = std::mem::take(&mut self.carryover_changes);
        if !phase1_deltas.is_empty() {
            let applied = self.veil.borrow_mut().apply_deltas(&phase1_deltas, sequence);
            match applied {
                Ok(changes) => {
                    frame.deltas.extend(phase1_deltas);
                    all_changes.extend(changes);
                }
                Err(e) => {
                    tracing::error!(target: "space.frame", sequence, error = %e, "phase1_batch_rejected");
                    self.metrics.state_fault();
                    fault_events.push(system_error_event(
                        ElementRef::new(space_id.clone()),
                        "state-invariant",
                        &e,
                    ));
                }
            }
        }

        // Phase 2: transforms to fixed point.
        let mut iterations = 0usize;
        let mut converged = false;
        while iterations < MAX_PHASE2_ITERATIONS {
            iterations += 1;
            let batch = self.run_transforms(&mut fault_events);
            if batch.is_empty() {
                converged = true;
                break;
            }
            let applied = self.veil.borrow_mut().apply_deltas(&batch, sequence);
            match applied {
                Ok(changes) => {
                    frame.deltas.extend(batch);
                    all_changes.extend(changes);
                }
                Err(e) => {
                    tracing::error!(target: "space.frame", sequence, iteration = iterations, error = %e, "phase2_batch_rejected");
                    self.metrics.state_fault();
                    fault_events.push(system_error_event(
                        ElementRef::new(space_id.clone()),
                        "state-invariant",
                        &e,
                    ));
                    converged = true; // rejected batch; nothing further to settle
                    break;
                }
            }
        }
        if !converged {
            self.metrics.divergence_warning();
            tracing::warn!(
                target: "space.frame",
                sequence,
                iterations,
                "phase2_iteration_bound_reached_without_convergence"
            );
        }

        // Phase 3: effectors over the merged change log.
        let mut summary = FrameSummary {
            sequence: Some(sequence),
            processed_events: events.len(),
            phase2_iterations: iterations,
            ..FrameSummary::default()
        };
        self.run_effectors(&all_changes, &mut summary, &mut fault_events)
            .await;

        // Phase 4a: the element-tree maintainer.
        let tm_out = {
            let veil = Rc::clone(&self.veil);
            let state = veil.borrow();
            let Space {
                tree,
                component_types,
                ..
            } = &mut *self;
            tree_maintainer::run(tree, &state, component_types, &all_changes, &events)
        };
        for (pref, roles) in &tm_out.registrations {
            self.register_roles(pref, *roles);
            self.pending_first_frame.push(pref.clone());
        }
        for event in tm_out.events {
            self.queue.borrow_mut().push(event);
        }
        if let Some(ops) = &tm_out.element_operations {
            frame.transition = Some(ops.clone());
        }
        self.apply_trailing_deltas(tm_out.deltas, sequence, &mut frame, &mut fault_events);
        self.prune_registrations();

        // Phase 4b: component maintainers. Their trailing deltas belong to
        // this frame's record even though they surface to effectors next
        // frame.
        let maintainer_deltas = self
            .run_maintainers(&frame, &all_changes, sequence, &mut fault_events)
            .await;
        frame.deltas.extend(maintainer_deltas);

        // Phase 4c: persistence, last so the frame record is complete.
        let element_operations = tm_out.element_operations;
        let rendered = self.pending_rendered.take();
        if let Some(p) = self.persistence.as_mut()
            && let Err(e) = p
                .record_frame(
                    &frame,
                    element_operations,
                    rendered,
                    &self.veil.borrow(),
                    &self.tree,
                    &self.component_types,
                    &space_id,
                )
                .await
        {
            tracing::error!(target: "persist.io", sequence, error = %e, "frame_persist_failed");
        }

        // Completion: commit, notify, frame:end through the tree.
        for event in fault_events {
            self.queue.borrow_mut().push(event);
        }
        let committed = self
            .veil
            .borrow_mut()
            .commit_frame(frame.clone(), &all_changes);
        if let Err(e) = committed {
            tracing::error!(target: "space.frame", sequence, error = %e, "frame_commit_failed");
        }
        self.metrics.frame_processed(events.len(), iterations);
        let completion = FrameCompletion {
            duration: started.elapsed(),
            processed_events: events.len(),
        };
        for observer in &observers {
            observer.on_frame_complete(&frame, &completion, &ctx);
        }
        let mut end_event = Event::new(
            topics::FRAME_END,
            self.tree.ref_of(&space_id),
            serde_json::json!({ "sequence": sequence }),
        );
        let emitted = self.tree.dispatch_broadcast(&mut end_event);
        for e in emitted {
            self.queue.borrow_mut().push(e);
        }
        tracing::debug!(
            target: "space.frame",
            sequence,
            events = completion.processed_events,
            iterations,
            duration_us = completion.duration.as_micros() as u64,
            "frame_complete"
        );
        summary.pending_events = self.queue.borrow().len();
        Ok(summary)
    }

    fn run_first_frame_hooks(&mut self) {
        let pending = std::mem::take(&mut self.pending_first_frame);
        for pref in pending {
            let path = self.tree.path_of(&pref.element_id);
            let mut events = Vec::new();
            if let Some(element) = self.tree.get_mut(&pref.element_id)
                && let Some(slot) = element.component_mut(pref.component_index)
                && slot.enabled
            {
                let mut ctx =
                    core_tree::LifecycleCtx::new(&pref.element_id, &path, &mut events);
                if let Err(e) = slot.component.on_first_frame(&mut ctx) {
                    tracing::warn!(
                        target: "space.frame",
                        element = pref.element_id.as_str(),
                        component = slot.type_name.as_str(),
                        error = %e,
                        "on_first_frame_failed"
                    );
                }
            }
            for event in events {
                self.queue.borrow_mut().push(event);
            }
        }
    }

    fn run_modulators(&mut self, events: Vec<Event>) -> Vec<Event> {
        let prefs = self.modulators.clone();
        let veil = Rc::clone(&self.veil);
        let state = veil.borrow();
        let mut admitted = Vec::with_capacity(events.len());
        'events: for event in events {
            for pref in &prefs {
                if let Some(element) = self.tree.get_mut(&pref.element_id)
                    && let Some(slot) = element.component_mut(pref.component_index)
                    && slot.enabled
                    && let Some(modulator) = slot.component.as_modulator()
                    && matches!(
                        modulator.admit(&event, &state),
                        core_pipeline::Admission::Drop
                    )
                {
                    tracing::debug!(
                        target: "space.frame",
                        topic = event.topic.as_str(),
                        modulator = pref.element_id.as_str(),
                        "event_dropped_by_modulator"
                    );
                    continue 'events;
                }
            }
            admitted.push(event);
        }
        admitted
    }

    fn run_receptors(
        &mut self,
        events: &[Event],
        fault_events: &mut Vec<Event>,
    ) -> Vec<VeilDelta> {
        let prefs = self.receptors.clone();
        let veil = Rc::clone(&self.veil);
        let state = veil.borrow();
        let mut deltas = Vec::new();
        for event in events {
            for receptor in self.builtin_receptors.iter_mut() {
                if !receptor
                    .topics()
                    .iter()
                    .any(|p| topic_matches(p, &event.topic))
                {
                    continue;
                }
                match receptor.transform(event, &state) {
                    Ok(batch) => deltas.extend(batch),
                    Err(e) => {
                        self.metrics.processor_fault();
                        tracing::warn!(target: "space.frame", topic = event.topic.as_str(), error = %e, "builtin_receptor_failed");
                        fault_events.push(system_error_event(
                            event.source.clone(),
                            "receptor-error",
                            &e,
                        ));
                    }
                }
            }
            for pref in &prefs {
                let Some(element) = self.tree.get_mut(&pref.element_id) else {
                    continue;
                };
                let Some(slot) = element.component_mut(pref.component_index) else {
                    continue;
                };
                if !slot.enabled {
                    continue;
                }
                let Some(receptor) = slot.component.as_receptor() else {
                    continue;
                };
                if !receptor
                    .topics()
                    .iter()
                    .any(|p| topic_matches(p, &event.topic))
                {
                    continue;
                }
                match receptor.transform(event, &state) {
                    Ok(batch) => deltas.extend(batch),
                    Err(e) => {
                        self.metrics.processor_fault();
                        tracing::warn!(
                            target: "space.frame",
                            element = pref.element_id.as_str(),
                            topic = event.topic.as_str(),
                            error = %e,
                            "receptor_failed"
                        );
                        fault_events.push(system_error_event(
                            ElementRef::new(pref.element_id.clone()),
                            "receptor-error",
                            &e,
                        ));
                    }
                }
            }
        }
        deltas
    }

    fn run_transforms(&mut self, fault_events: &mut Vec<Event>) -> Vec<VeilDelta> {
        let prefs = self.transforms.clone();
        let veil = Rc::clone(&self.veil);
        let state = veil.borrow();
        let mut batch = Vec::new();
        for pref in &prefs {
            let Some(element) = self.tree.get_mut(&pref.element_id) else {
                continue;
            };
            let Some(slot) = element.component_mut(pref.component_index) else {
                continue;
            };
            if !slot.enabled {
                continue;
            }
            let Some(transform) = slot.component.as_transform() else {
                continue;
            };
            match transform.process(&state) {
                Ok(deltas) => batch.extend(deltas),
                Err(e) => {
                    self.metrics.processor_fault();
                    tracing::warn!(
                        target: "space.frame",
                        element = pref.element_id.as_str(),
                        error = %e,
                        "transform_failed"
                    );
                    fault_events.push(system_error_event(
                        ElementRef::new(pref.element_id.clone()),
                        "transform-error",
                        &e,
                    ));
                }
            }
        }
        // Built-in tail: ephemeral cleanup runs last in every iteration.
        for transform in self.builtin_tail_transforms.iter_mut() {
            match transform.process(&state) {
                Ok(deltas) => batch.extend(deltas),
                Err(e) => {
                    self.metrics.processor_fault();
                    tracing::warn!(target: "space.frame", error = %e, "builtin_transform_failed");
                }
            }
        }
        batch
    }

    async fn run_effectors(
        &mut self,
        all_changes: &[FacetChange],
        summary: &mut FrameSummary,
        fault_events: &mut Vec<Event>,
    ) {
        let prefs = self.effectors.clone();
        let veil = Rc::clone(&self.veil);
        let queue = Rc::clone(&self.queue);
        for pref in &prefs {
            let state = veil.borrow();
            let Some(element) = self.tree.get_mut(&pref.element_id) else {
                continue;
            };
            let Some(slot) = element.component_mut(pref.component_index) else {
                continue;
            };
            if !slot.enabled {
                continue;
            }
            let Some(effector) = slot.component.as_effector() else {
                continue;
            };
            let filtered = filter_changes(&effector.facet_filters(), all_changes);
            if filtered.is_empty() {
                continue;
            }
            match effector.process(&filtered, &state).await {
                Ok(output) => {
                    for event in output.events {
                        queue.borrow_mut().push(event);
                    }
                    summary.external_actions.extend(output.external_actions);
                }
                Err(e) => {
                    self.metrics.processor_fault();
                    tracing::warn!(
                        target: "space.frame",
                        element = pref.element_id.as_str(),
                        error = %e,
                        "effector_failed"
                    );
                    fault_events.push(system_error_event(
                        ElementRef::new(pref.element_id.clone()),
                        "effector-error",
                        &e,
                    ));
                }
            }
        }
    }

    async fn run_maintainers(
        &mut self,
        frame: &Frame,
        all_changes: &[FacetChange],
        sequence: u64,
        fault_events: &mut Vec<Event>,
    ) -> Vec<VeilDelta> {
        let mut applied = Vec::new();
        let prefs = self.maintainers.clone();
        let veil = Rc::clone(&self.veil);
        let queue = Rc::clone(&self.queue);
        for pref in &prefs {
            let output = {
                let state = veil.borrow();
                let Some(element) = self.tree.get_mut(&pref.element_id) else {
                    continue;
                };
                let Some(slot) = element.component_mut(pref.component_index) else {
                    continue;
                };
                if !slot.enabled {
                    continue;
                }
                let Some(maintainer) = slot.component.as_maintainer() else {
                    continue;
                };
                match maintainer.process(frame, all_changes, &state).await {
                    Ok(output) => output,
                    Err(e) => {
                        self.metrics.processor_fault();
                        tracing::warn!(
                            target: "space.frame",
                            element = pref.element_id.as_str(),
                            error = %e,
                            "maintainer_failed"
                        );
                        fault_events.push(system_error_event(
                            ElementRef::new(pref.element_id.clone()),
                            "maintainer-error",
                            &e,
                        ));
                        continue;
                    }
                }
            };
            for event in output.events {
                queue.borrow_mut().push(event);
            }
            // Trailing deltas: applied now, surfaced to effectors next frame.
            if !output.deltas.is_empty() {
                let result = self.veil.borrow_mut().apply_deltas(&output.deltas, sequence);
                match result {
                    Ok(changes) => {
                        self.carryover_changes.extend(changes);
                        applied.extend(output.deltas);
                    }
                    Err(e) => {
                        self.metrics.state_fault();
                        fault_events.push(system_error_event(
                            ElementRef::new(pref.element_id.clone()),
                            "state-invariant",
                            &e,
                        ));
                    }
                }
            }
        }
        applied
    }

    pub(crate) fn apply_trailing_deltas(
        &mut self,
        deltas: Vec<VeilDelta>,
        sequence: u64,
        frame: &mut Frame,
        fault_events: &mut Vec<Event>,
    ) {
        if deltas.is_empty() {
            return;
        }
        let result = self.veil.borrow_mut().apply_deltas(&deltas, sequence);
        match result {
            Ok(changes) => {
                frame.deltas.extend(deltas);
                self.carryover_changes.extend(changes);
            }
            Err(e) => {
                tracing::error!(target: "space.frame", sequence, error = %e, "trailing_batch_rejected");
                self.metrics.state_fault();
                fault_events.push(system_error_event(
                    ElementRef::new(self.id.clone()),
                    "state-invariant",
                    &e,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::space::Space;

    #[tokio::test]
    async fn reentrant_process_frame_is_a_noop() {
        let mut space = Space::new("space");
        space.processing = true;
        let summary = space.process_frame().await.unwrap();
        assert!(summary.skipped);
        assert_eq!(space.veil().current_sequence(), 0, "no sequence consumed");
        assert_eq!(space.metrics().reentrant_rejections, 1);

        space.processing = false;
        let summary = space.process_frame().await.unwrap();
        assert!(!summary.skipped);
        assert_eq!(summary.sequence, Some(1));
    }
}
