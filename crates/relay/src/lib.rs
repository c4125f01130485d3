//! Relay between the edge analyzer and remote clients.
//!
//! A sync agent polls the edge on a fixed interval and mirrors its latest
//! result into [`cache::RelayCache`]; clients read the mirror over HTTP and
//! receive change events over Server-Sent Events.

pub mod cache;
pub mod client;
pub mod config;
pub mod events;
pub mod server;
pub mod service;
pub mod sync;

pub use config::{RelayCliArgs, RelayConfig};
