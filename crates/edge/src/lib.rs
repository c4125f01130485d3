//! Edge analyzer: captures a frame on request, finds rebar cross-sections,
//! measures them and serves the latest result over HTTP.

pub mod api;
pub mod archive;
pub mod config;
pub mod controller;
pub mod detection;
pub mod server;
pub mod service;
pub mod settings;
pub mod tier_file;

pub use config::{EdgeCliArgs, EdgeConfig};
