//! Async event sources.
//!
//! Everything outside the kernel that wants to inject events (console
//! readline, chat gateways, sensors) implements [`AsyncEventSource`]: it is
//! handed a clone of the bounded feed channel and owns one background task.
//! A source must terminate promptly when `send` fails (the consumer dropped
//! the channel during shutdown); it must not busy-poll.

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use crate::Event;

/// An async producer of kernel events. Implementors hold their own
/// configuration and spawn exactly one background task.
pub trait AsyncEventSource: Send + 'static {
    /// Stable identifier used in logs and diagnostics.
    fn name(&self) -> &'static str;
    /// Consume self and spawn the producing task. The task must exit when
    /// `tx.send(..).await` returns `Err` or its own input is exhausted.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Startup registry of event sources. Sources are registered during host
/// bootstrap and spawned together once the feed channel exists; the drained
/// registry prevents accidental double-spawn.
#[derive(Default)]
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: AsyncEventSource>(&mut self, source: S) {
        self.sources.push(Box::new(source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Spawn every registered source, draining the registry. Call after the
    /// feed channel is constructed and before the run loop starts consuming.
    /// During shutdown the caller drops its last `Sender` clone and then
    /// awaits the returned handles so sources observe channel closure.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.sources.len());
        for source in self.sources.drain(..) {
            tracing::info!(target: "space.sources", source = source.name(), "spawning event source");
            handles.push(source.spawn(tx.clone()));
        }
        handles
    }
}
