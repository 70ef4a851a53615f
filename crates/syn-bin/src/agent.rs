//! The assistant agent effector: woken by `agent-activation` facets, it
//! renders the console conversation into messages, asks the completion port
//! for a reply, prints it, and hands the speech facet back to the world via
//! the `veil:operation` compat path.

use std::rc::Rc;

use async_trait::async_trait;
use core_events::{Event, topics};
use core_pipeline::{Effector, EffectorOutput, ExternalAction, FacetFilter};
use core_tree::{Component, ReferenceRegistry};
use core_veil::{Facet, FacetChange, VeilState, facet_types};
use serde_json::json;

use crate::completion::{CompletionHandle, CompletionPort, Message};
use crate::console::CONSOLE_STREAM;

pub const AGENT_ID: &str = "assistant";
pub const AGENT_NAME: &str = "Assistant";

pub struct AssistantAgent {
    port: Option<Rc<dyn CompletionPort>>,
    replies: u64,
}

impl AssistantAgent {
    pub const TYPE_NAME: &'static str = "assistant-agent";

    pub fn new() -> Self {
        Self {
            port: None,
            replies: 0,
        }
    }

    /// Console transcript in store order, oldest first. Ids embed the
    /// creating sequence, and the facet map is ordered, so this is stable.
    fn conversation(state: &VeilState) -> Vec<Message> {
        state
            .facets_of_type("console-message")
            .filter_map(|facet| facet.content.as_deref().map(Message::user))
            .collect()
    }
}

impl Default for AssistantAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Effector for AssistantAgent {
    fn facet_filters(&self) -> Vec<FacetFilter> {
        vec![FacetFilter::default().of_type(facet_types::AGENT_ACTIVATION)]
    }

    async fn process(
        &mut self,
        changes: &[FacetChange],
        state: &VeilState,
    ) -> anyhow::Result<EffectorOutput> {
        // Only react to fresh activations, not to their cleanup removals.
        if !changes
            .iter()
            .any(|c| matches!(c, FacetChange::Added { .. }))
        {
            return Ok(EffectorOutput::none());
        }
        let Some(port) = self.port.clone() else {
            anyhow::bail!("completion port unavailable");
        };
        let messages = Self::conversation(state);
        let reply = port.complete(&messages).await?;
        self.replies += 1;
        println!("{AGENT_NAME}> {reply}");

        let speech = Facet::new(
            format!("speech-{}-{}", state.current_sequence(), self.replies),
            facet_types::SPEECH,
        )
        .with_content(reply.clone())
        .with_stream(CONSOLE_STREAM)
        .with_agent(AGENT_ID);
        let source = core_events::ElementRef::new(AGENT_ID).with_type("agent");
        Ok(EffectorOutput::none()
            .with_external_action(ExternalAction::new(
                "console-output",
                json!({ "text": reply }),
            ))
            .with_event(Event::new(
                topics::VEIL_OPERATION,
                source.clone(),
                json!({ "operation": { "type": "addFacet", "facet": speech } }),
            ))
            .with_event(Event::new(
                topics::AGENT_FRAME_READY,
                source,
                json!({ "agentId": AGENT_ID, "reply": reply }),
            )))
    }
}

impl Component for AssistantAgent {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn required_references(&self) -> Vec<String> {
        vec!["provider:completion".to_string()]
    }

    fn on_references_resolved(&mut self, refs: &ReferenceRegistry) -> anyhow::Result<()> {
        let handle = refs
            .get::<CompletionHandle>("provider:completion")
            .ok_or_else(|| anyhow::anyhow!("`provider:completion` is not a completion handle"))?;
        self.port = Some(Rc::clone(&handle.0));
        Ok(())
    }

    fn persistent_state(&self) -> Option<serde_json::Value> {
        Some(json!({ "replies": self.replies }))
    }

    fn apply_persistent_state(&mut self, state: serde_json::Value) -> anyhow::Result<()> {
        self.replies = state.get("replies").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(())
    }

    fn as_effector(&mut self) -> Option<&mut dyn Effector> {
        Some(self)
    }
}
