//! Polling loop that keeps the relay cache in step with the edge.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use rebar_core::{telemetry, wire::LatestResponse};
use tracing::{debug, info, info_span, warn};

use crate::{
    cache::RelayCache,
    client::{EdgeClient, RelayError},
    events::{EventHub, RelayEvent},
};

/// Granularity at which a sleeping agent notices a shutdown request.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub struct RelaySyncAgent {
    client: Arc<dyn EdgeClient>,
    cache: Arc<RelayCache>,
    hub: EventHub,
}

impl RelaySyncAgent {
    pub fn new(client: Arc<dyn EdgeClient>, cache: Arc<RelayCache>, hub: EventHub) -> Self {
        Self { client, cache, hub }
    }

    /// One poll cycle. Returns whether the edge counted as connected.
    pub fn poll_once(&self) -> bool {
        let span = info_span!("relay.poll");
        let _guard = span.enter();

        let latest = self.check_connection();
        let mut connected = latest.is_some();
        let previous = self.cache.set_connected(connected);
        if previous != connected {
            info!("connection status changed from {previous} to {connected}");
            self.hub.publish(self.cache.connection_status_event());
        }

        match latest {
            Some(latest) => match self.sync_data(latest) {
                Ok(()) => {
                    self.hub.publish(self.cache.connection_status_event());
                }
                Err(err) => {
                    warn!("error polling edge: {err}");
                    connected = false;
                    self.cache.set_connected(false);
                    self.hub.publish(RelayEvent::ConnectionError {
                        error: err.to_string(),
                    });
                    self.hub.publish(self.cache.connection_status_event());
                }
            },
            None => {
                self.hub.publish(self.cache.connection_status_event());
            }
        }

        metrics::counter!(
            "relay_poll_cycles_total",
            "connected" => if connected { "true" } else { "false" }
        )
        .increment(1);
        connected
    }

    /// Both the status probe and the latest-results read must succeed.
    fn check_connection(&self) -> Option<LatestResponse> {
        match self.client.status() {
            Ok(status) if status.is_online() => {}
            Ok(status) => {
                debug!("edge reports status {:?}", status.status);
                return None;
            }
            Err(err) => {
                debug!("edge unreachable: {err}");
                return None;
            }
        }
        match self.client.latest() {
            Ok(latest) => Some(latest),
            Err(err) => {
                debug!("edge reachable but latest results failed: {err}");
                None
            }
        }
    }

    fn sync_data(&self, latest: LatestResponse) -> Result<(), RelayError> {
        if latest.timestamp == self.cache.last_update() {
            return Ok(());
        }
        info!("new data received with timestamp {:?}", latest.timestamp);

        let image = if latest.image_available {
            Some(self.client.latest_image()?.image)
        } else {
            None
        };
        let has_image = image.is_some();
        let segments_count = latest.segments.len();
        let total_volume = latest.total_volume;
        self.cache.store_result(
            latest.timestamp.clone(),
            latest.segments,
            total_volume,
            image,
        );

        self.hub.publish(RelayEvent::NewData {
            connected: true,
            timestamp: latest.timestamp,
            has_image,
            segments_count,
            total_volume,
        });
        Ok(())
    }

    /// Poll every `interval` until `shutdown` is set.
    pub fn run(&self, interval: Duration, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            self.poll_once();

            let deadline = Instant::now() + interval;
            while !shutdown.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(SHUTDOWN_POLL));
            }
        }
        debug!("relay sync agent stopped");
    }
}

/// Run `agent` on its own thread.
pub fn spawn_sync_agent(
    agent: RelaySyncAgent,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("relay-sync", move || agent.run(interval, &shutdown))
}
