//! Process wiring for the relay.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use rebar_core::telemetry;
use tracing::{info, warn};

use crate::{
    cache::RelayCache,
    client::{EdgeClient, HttpEdgeClient},
    config::RelayConfig,
    events::EventHub,
    server::{RelayState, spawn_relay_server},
    sync::{RelaySyncAgent, spawn_sync_agent},
};

/// Run the relay until Ctrl+C.
pub fn run(config: RelayConfig) -> Result<()> {
    if let Err(err) = telemetry::init_subscriber(config.log_filter.as_deref()) {
        eprintln!("tracing subscriber already installed: {err}");
    }
    let _ = telemetry::init_metrics_recorder();

    let span = tracing::info_span!("relay.service", edge = %config.edge_url, bind = %config.bind);
    let _span_guard = span.enter();
    info!("connecting to edge at {}", config.edge_url);

    let client: Arc<dyn EdgeClient> = Arc::new(
        HttpEdgeClient::new(config.edge_url.clone(), config.timeouts)
            .context("failed to create edge client")?,
    );
    let cache = Arc::new(RelayCache::new());
    let hub = EventHub::default();

    let shutdown = install_shutdown_flag();
    let agent = RelaySyncAgent::new(client.clone(), cache.clone(), hub.clone());
    let sync = spawn_sync_agent(agent, config.poll_interval, shutdown.clone())
        .context("failed to spawn sync agent")?;

    let state = RelayState {
        cache,
        client: client.clone(),
        hub,
    };
    let server = match spawn_relay_server(state, config.bind) {
        Ok(server) => server,
        Err(err) => {
            shutdown.store(true, Ordering::SeqCst);
            let _ = sync.join();
            return Err(err);
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    server.stop();
    if sync.join().is_err() {
        warn!("sync agent panicked");
    }
    // The blocking client must not be dropped inside an async runtime.
    drop(client);
    Ok(())
}

fn install_shutdown_flag() -> Arc<AtomicBool> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
    shutdown
}
