//! Configuration parsing for the relay.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, bail};
use clap::Parser;

/// Per-request timeouts used when talking to the edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeTimeouts {
    /// Status probe and config reads/writes.
    pub status: Duration,
    /// Latest results and image downloads.
    pub data: Duration,
    /// Forwarded capture triggers.
    pub capture: Duration,
}

impl Default for EdgeTimeouts {
    fn default() -> Self {
        Self {
            status: Duration::from_secs(2),
            data: Duration::from_secs(5),
            capture: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// Edge API base, e.g. `http://192.168.4.1:5000/api`, without a trailing slash.
    pub edge_url: String,
    pub poll_interval: Duration,
    pub timeouts: EdgeTimeouts,
    pub log_filter: Option<String>,
}

/// Command-line flags for `rebar-relay`.
#[derive(Debug, Parser)]
#[command(name = "rebar-relay", about = "Mirror the rebar edge analyzer and push updates to clients")]
pub struct RelayCliArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, default_value_t = 8000)]
    pub port: u16,
    #[arg(long = "edge-url", value_name = "URL", default_value = "http://localhost:5000/api")]
    pub edge_url: String,
    #[arg(long = "poll-interval-ms", default_value_t = 3000)]
    pub poll_interval_ms: u64,
    #[arg(long = "status-timeout-ms", default_value_t = 2000)]
    pub status_timeout_ms: u64,
    #[arg(long = "data-timeout-ms", default_value_t = 5000)]
    pub data_timeout_ms: u64,
    #[arg(long = "capture-timeout-ms", default_value_t = 10000)]
    pub capture_timeout_ms: u64,
    /// Log filter directives; overrides RUST_LOG.
    #[arg(long = "log", value_name = "FILTER")]
    pub log_filter: Option<String>,
}

impl TryFrom<RelayCliArgs> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(args: RelayCliArgs) -> Result<Self> {
        let bind: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
            Ok(addr) => addr,
            Err(err) => bail!("invalid bind address {}:{}: {err}", args.host, args.port),
        };

        let edge_url = args.edge_url.trim().trim_end_matches('/').to_string();
        if !(edge_url.starts_with("http://") || edge_url.starts_with("https://")) {
            bail!("--edge-url must start with http:// or https://");
        }
        if args.poll_interval_ms == 0 {
            bail!("--poll-interval-ms must be positive");
        }
        if args.status_timeout_ms == 0 || args.data_timeout_ms == 0 || args.capture_timeout_ms == 0
        {
            bail!("Edge request timeouts must be positive");
        }

        Ok(Self {
            bind,
            edge_url,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            timeouts: EdgeTimeouts {
                status: Duration::from_millis(args.status_timeout_ms),
                data: Duration::from_millis(args.data_timeout_ms),
                capture: Duration::from_millis(args.capture_timeout_ms),
            },
            log_filter: args.log_filter,
        })
    }
}
