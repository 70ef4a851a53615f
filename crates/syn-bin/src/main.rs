//! Synapse entrypoint: config, logging, bootstrap-or-restore, run loop,
//! graceful shutdown.

mod agent;
mod completion;
mod console;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Once;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use core_config::Config;
use core_events::{EVENT_CHANNEL_CAP, Event, EventSourceRegistry};
use core_persist::FileStorage;
use core_space::{
    DebugObserver, FrameCompletion, FrameContext, PersistenceMaintainer, RenderedContextInfo,
    Space, restore_space,
};
use core_tree::{ComponentRegistry, Element};
use core_veil::{AgentFlags, AgentInfo, Frame, Stream};

use crate::agent::{AGENT_ID, AGENT_NAME, AssistantAgent};
use crate::completion::{CompletionHandle, EchoCompletion};
use crate::console::{ConsoleChannel, ConsoleSource};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "synapse", version, about = "Deterministic agent-runtime kernel")]
struct Args {
    /// Optional configuration file path (overrides discovery of `synapse.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Wipe the storage directory and start a fresh lifecycle.
    #[arg(long = "reset")]
    reset: bool,
    /// Override the persistence storage directory.
    #[arg(long = "storage-dir")]
    storage_dir: Option<PathBuf>,
}

fn configure_logging() -> Option<WorkerGuard> {
    let log_dir = Path::new(".");
    let file_appender = tracing_appender::rolling::never(log_dir, "synapse.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        Err(_) => {
            // Global subscriber already installed; drop the guard so the
            // writer shuts down.
            None
        }
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!(target: "runtime.panic", ?panic_info, "panic");
            default_panic(panic_info);
        }));
    });
}

/// Observer bridging the kernel's debug port onto tracing. The HTTP/WS
/// debug server would consume the same port; until it exists, the log is
/// the inspection surface.
struct TracingObserver;

impl DebugObserver for TracingObserver {
    fn on_frame_start(&self, frame: &Frame, ctx: &FrameContext) {
        tracing::debug!(target: "debug.port", space = ctx.space_id, sequence = frame.sequence, "frame_start");
    }
    fn on_frame_event(&self, frame: &Frame, event: &Event, _ctx: &FrameContext) {
        tracing::debug!(
            target: "debug.port",
            sequence = frame.sequence,
            topic = event.topic.as_str(),
            source = event.source.element_id.as_str(),
            "frame_event"
        );
    }
    fn on_frame_complete(&self, frame: &Frame, completion: &FrameCompletion, _ctx: &FrameContext) {
        tracing::debug!(
            target: "debug.port",
            sequence = frame.sequence,
            events = completion.processed_events,
            duration_us = completion.duration.as_micros() as u64,
            "frame_complete"
        );
    }
    fn on_outgoing_frame(&self, frame: &Frame, _ctx: &FrameContext) {
        tracing::debug!(target: "debug.port", sequence = frame.sequence, "outgoing_frame");
    }
    fn on_rendered_context(&self, info: &RenderedContextInfo) {
        tracing::debug!(
            target: "debug.port",
            sequence = info.sequence,
            bytes = info.rendered.len(),
            "rendered_context"
        );
    }
}

/// Component types the host can restore or create declaratively.
fn build_component_registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry.register(ConsoleChannel::TYPE_NAME, 1, |_config| {
        Ok(Box::new(ConsoleChannel::new()))
    });
    registry.register(AssistantAgent::TYPE_NAME, 1, |_config| {
        Ok(Box::new(AssistantAgent::new()))
    });
    registry
}

/// Bindings shared by fresh bootstrap and restoration: providers and secrets
/// from the config file, plus the completion port the assistant requires.
fn register_references(space: &mut Space, config: &Config) {
    for (id, value) in &config.file.providers {
        space
            .references_mut()
            .insert_value(format!("provider:{id}"), value.clone());
    }
    for (name, value) in &config.file.secrets {
        space
            .references_mut()
            .insert_value(format!("secret:{name}"), value.clone());
    }
    space.references_mut().insert_value(
        "provider:completion",
        CompletionHandle(Rc::new(EchoCompletion)),
    );
}

/// First-run bootstrap: console and assistant elements under the root.
fn bootstrap(
    config: &Config,
    persistence: Option<PersistenceMaintainer>,
) -> Result<Space> {
    let mut space = Space::new("space");
    *space.component_types_mut() = build_component_registry();
    if let Some(p) = persistence {
        space.attach_persistence(p);
    }
    register_references(&mut space, config);
    space.register_agent(AgentInfo::new(AGENT_ID, AGENT_NAME).with_flags(AgentFlags::SPEECH));
    space.register_stream(Stream::new(console::CONSOLE_STREAM, "console"));
    if config.file.console.enabled {
        let mut console_element = Element::new("console", "console");
        console_element.subscribe("console:*");
        space.add_element("space", console_element)?;
        space.add_component("console", Box::new(ConsoleChannel::new()))?;
        space.add_element("space", Element::new(AGENT_ID, "assistant"))?;
        space.add_component(AGENT_ID, Box::new(AssistantAgent::new()))?;
    }
    space.resolve_references()?;
    info!(target: "runtime.startup", elements = space.tree().len(), "bootstrap_complete");
    Ok(space)
}

async fn build_space(args: &Args, config: &Config) -> Result<Space> {
    if !config.file.persistence.enabled {
        return bootstrap(config, None);
    }
    let storage = Rc::new(FileStorage::new(&config.file.persistence.storage_dir));
    let lifecycle_id = storage.prepare_lifecycle(args.reset).await?;
    let interval = config.file.persistence.snapshot_interval;
    match restore_space(
        Rc::clone(&storage),
        lifecycle_id,
        interval,
        build_component_registry(),
    )
    .await
    {
        Ok(Some((mut space, report))) => {
            register_references(&mut space, config);
            space.complete_restoration()?;
            info!(
                target: "runtime.startup",
                snapshot = report.snapshot_sequence,
                replayed = report.replayed_frames,
                materialized = report.materialized_elements,
                sequence = space.veil().current_sequence(),
                "restore_complete"
            );
            Ok(space)
        }
        Ok(None) => bootstrap(
            config,
            Some(PersistenceMaintainer::new(storage, lifecycle_id, interval)),
        ),
        Err(e) => {
            // Persistence is enabled and there is data we failed to load;
            // exiting beats silently dropping it.
            error!(target: "runtime.startup", error = %e, "restore_failed");
            Err(e)
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(target: "runtime", error = %e, "sigterm_handler_unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _log_guard = configure_logging();
    install_panic_hook();
    info!(target: "runtime", "startup");

    let args = Args::parse();
    let mut config = core_config::load_from(args.config.clone())?;
    config.override_storage_dir(args.storage_dir.clone());

    let mut space = build_space(&args, &config).await?;
    if config.file.debug.enabled {
        // The embedded debug server is not part of this build; expose the
        // observer feed through tracing instead.
        info!(target: "debug.port", port = config.file.debug.port, "debug_observer_attached");
        space.add_observer(Rc::new(TracingObserver));
    }

    let (feed_tx, feed_rx) = mpsc::channel(EVENT_CHANNEL_CAP);
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut sources = EventSourceRegistry::new();
    if config.file.console.enabled {
        sources.register(ConsoleSource);
        println!("synapse ready. Type a message and press enter:");
    }
    let source_handles = sources.spawn_all(&feed_tx);

    tokio::spawn(async move {
        wait_for_termination().await;
        info!(target: "runtime", "termination_signal");
        let _ = stop_tx.send(true);
    });

    space.run(feed_rx, stop_rx).await?;

    // Close the feed so sources observe the shutdown, then reap them.
    drop(feed_tx);
    for handle in source_handles {
        let _ = tokio::time::timeout(std::time::Duration::from_millis(500), handle).await;
    }
    info!(
        target: "runtime",
        frames = space.metrics().frames_processed,
        sequence = space.veil().current_sequence(),
        "shutdown_complete"
    );
    Ok(())
}
