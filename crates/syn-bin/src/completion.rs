//! The language-model port: the single seam through which agents reach a
//! completion provider. The kernel never sees the provider; the host binds a
//! `CompletionHandle` under `provider:completion` in the reference registry.

use std::rc::Rc;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[async_trait(?Send)]
pub trait CompletionPort {
    async fn complete(&self, messages: &[Message]) -> anyhow::Result<String>;
}

/// Shared handle stored in the reference registry; components look it up as
/// a typed value and clone the inner port.
pub struct CompletionHandle(pub Rc<dyn CompletionPort>);

/// Offline provider: replies with the last user message. Keeps the binary
/// self-contained and replay-deterministic.
#[derive(Debug, Default)]
pub struct EchoCompletion;

#[async_trait(?Send)]
impl CompletionPort for EchoCompletion {
    async fn complete(&self, messages: &[Message]) -> anyhow::Result<String> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("…");
        Ok(format!("you said: {last}"))
    }
}
