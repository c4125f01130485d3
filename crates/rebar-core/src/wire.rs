//! JSON bodies exchanged over the edge HTTP API.
//!
//! The edge serialises these and the relay deserialises them, so both sides
//! share one definition.

use serde::{Deserialize, Serialize};

use crate::{model::Segment, store::Published};

pub const STATUS_ONLINE: &str = "online";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub camera_available: bool,
    pub has_results: bool,
}

impl StatusResponse {
    pub fn online(camera_available: bool, has_results: bool) -> Self {
        Self {
            status: STATUS_ONLINE.to_string(),
            camera_available,
            has_results,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == STATUS_ONLINE
    }
}

/// `timestamp` is `null` and `segments` empty until the first publish.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatestResponse {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub total_volume: f64,
    #[serde(default)]
    pub image_available: bool,
}

impl LatestResponse {
    pub fn empty() -> Self {
        Self {
            timestamp: None,
            segments: Vec::new(),
            total_volume: 0.0,
            image_available: false,
        }
    }

    pub fn from_published(published: Option<&Published>) -> Self {
        let Some(published) = published else {
            return Self::empty();
        };
        let snapshot = &published.snapshot;
        Self {
            timestamp: Some(snapshot.timestamp().to_string()),
            segments: snapshot.segments().to_vec(),
            total_volume: snapshot.total_volume_cc(),
            image_available: snapshot.image_available(),
        }
    }
}

/// Base64-encoded JPEG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub image: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigView {
    pub detection_threshold: f64,
    pub camera_enabled: bool,
    pub external_camera_index: u32,
}

/// Partial configuration update; absent keys are left unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_camera_index: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::Snapshot, store::ResultStore};

    #[test]
    fn latest_without_data_is_null_timestamp() {
        let value = serde_json::to_value(LatestResponse::from_published(None)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "timestamp": null,
                "segments": [],
                "total_volume": 0.0,
                "image_available": false
            })
        );
    }

    #[test]
    fn latest_reflects_published_snapshot() {
        let store = ResultStore::new();
        store.publish(Snapshot::new("20240101-000000-001", Vec::new(), Some(vec![0xFF, 0xD8])));
        let latest = LatestResponse::from_published(store.read().as_ref());
        assert_eq!(latest.timestamp.as_deref(), Some("20240101-000000-001"));
        assert!(latest.image_available);
    }

    #[test]
    fn partial_config_patch_parses() {
        let patch: ConfigPatch = serde_json::from_str(r#"{"detection_threshold": 0.6}"#).unwrap();
        assert_eq!(patch.detection_threshold, Some(0.6));
        assert_eq!(patch.external_camera_index, None);
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"detection_threshold":0.6}"#);
    }

    #[test]
    fn status_online_flag() {
        assert!(StatusResponse::online(true, false).is_online());
        let offline: StatusResponse =
            serde_json::from_str(r#"{"status":"busy","camera_available":false,"has_results":false}"#)
                .unwrap();
        assert!(!offline.is_online());
    }
}
