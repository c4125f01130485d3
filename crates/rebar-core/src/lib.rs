//! Measurement core shared by the edge analyzer and the relay.
//!
//! - `model`: snapshot and segment records plus their JSON shape.
//! - `tiers`: diameter brackets mapping to cement:sand:aggregate ratios.
//! - `measurement`: pixel boxes → physical dimensions → snapshot.
//! - `overlay`: annotated result image drawn over the analysed frame.
//! - `store`: holder for the single latest published snapshot.
//! - `detector`: interface to the external instance-detection models.
//! - `wire`: request/response bodies of the edge HTTP API.
//! - `http`: actix server bootstrap shared by the edge API and the relay.
//! - `telemetry`: tracing subscriber and Prometheus recorder setup.

pub mod detector;
pub mod http;
pub mod measurement;
pub mod model;
pub mod overlay;
pub mod store;
pub mod telemetry;
pub mod tiers;
pub mod wire;

pub use detector::{DetectorError, Instance, InstanceModel, Mask};
pub use measurement::{Calibration, MeasurementEngine};
pub use model::{MixRatio, PixelBox, Segment, Snapshot};
pub use store::{Published, ResultStore};
pub use tiers::{Tier, TierError, TierSet};

#[cfg(feature = "with-tch")]
pub use tch;
