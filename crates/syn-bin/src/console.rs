//! Console channel: the stdin event source and the receptor that turns
//! `console:input` events into world content.

use core_events::{AsyncEventSource, ElementRef, Event};
use core_pipeline::Receptor;
use core_tree::Component;
use core_veil::{Facet, VeilDelta, VeilState, facet_types};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

pub const CONSOLE_STREAM: &str = "console";

/// Reads stdin lines and feeds them into the kernel as `console:input`
/// events. Exits on EOF or channel closure.
pub struct ConsoleSource;

impl AsyncEventSource for ConsoleSource {
    fn name(&self) -> &'static str {
        "console-stdin"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let event = Event::new(
                            "console:input",
                            ElementRef::new("console").with_type("console"),
                            json!({ "input": line }),
                        );
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(target: "console", error = %e, "stdin_read_failed");
                        break;
                    }
                }
            }
        })
    }
}

/// Receptor half of the console channel: each `console:input` event becomes
/// a durable `console-message` facet plus a one-shot `agent-activation`
/// facet that wakes the assistant next frame.
#[derive(Debug, Default)]
pub struct ConsoleChannel {
    messages_seen: u64,
}

impl ConsoleChannel {
    pub const TYPE_NAME: &'static str = "console-channel";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Receptor for ConsoleChannel {
    fn topics(&self) -> Vec<String> {
        vec!["console:input".to_string()]
    }

    fn transform(&mut self, event: &Event, state: &VeilState) -> anyhow::Result<Vec<VeilDelta>> {
        let Some(input) = event.payload_str("input") else {
            anyhow::bail!("console:input payload missing `input`");
        };
        self.messages_seen += 1;
        let sequence = state.current_sequence();
        let n = self.messages_seen;
        let message = Facet::new(
            format!("console-message-{sequence}-{n}"),
            "console-message",
        )
        .with_content(input)
        .with_stream(CONSOLE_STREAM)
        .with_attribute("sourceAgentId", json!("user"));
        let activation = Facet::new(
            format!("agent-activation-{sequence}-{n}"),
            facet_types::AGENT_ACTIVATION,
        )
        .with_attribute("sourceAgentId", json!("user"))
        .with_stream(CONSOLE_STREAM)
        .ephemeral();
        Ok(vec![VeilDelta::add(message), VeilDelta::add(activation)])
    }
}

impl Component for ConsoleChannel {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn persistent_state(&self) -> Option<serde_json::Value> {
        Some(json!({ "messagesSeen": self.messages_seen }))
    }

    fn apply_persistent_state(&mut self, state: serde_json::Value) -> anyhow::Result<()> {
        self.messages_seen = state
            .get("messagesSeen")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(())
    }

    fn as_receptor(&mut self) -> Option<&mut dyn Receptor> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_events_become_message_and_activation_facets() {
        let mut state = VeilState::new();
        state.next_sequence();
        let mut channel = ConsoleChannel::new();
        let event = Event::new(
            "console:input",
            ElementRef::new("console"),
            json!({ "input": "hello" }),
        );
        let deltas = channel.transform(&event, &state).unwrap();
        assert_eq!(deltas.len(), 2);
        match &deltas[0] {
            VeilDelta::AddFacet { facet } => {
                assert_eq!(facet.facet_type, "console-message");
                assert_eq!(facet.content.as_deref(), Some("hello"));
                assert!(!facet.ephemeral);
            }
            other => panic!("expected addFacet, got {other:?}"),
        }
        match &deltas[1] {
            VeilDelta::AddFacet { facet } => {
                assert_eq!(facet.facet_type, facet_types::AGENT_ACTIVATION);
                assert!(facet.ephemeral);
                assert_eq!(facet.attribute("sourceAgentId"), Some(&json!("user")));
            }
            other => panic!("expected addFacet, got {other:?}"),
        }
    }

    #[test]
    fn persistent_state_round_trips_the_counter() {
        let mut channel = ConsoleChannel::new();
        channel.messages_seen = 41;
        let state = channel.persistent_state().unwrap();
        let mut restored = ConsoleChannel::new();
        restored.apply_persistent_state(state).unwrap();
        assert_eq!(restored.messages_seen, 41);
    }
}
