//! The relay's mirror of the edge's latest result.

use std::sync::RwLock;

use rebar_core::Segment;
use serde::{Deserialize, Serialize};

use crate::events::RelayEvent;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedData {
    pub connected: bool,
    pub last_update: Option<String>,
    pub segments: Vec<Segment>,
    pub total_volume: f64,
    /// Base64 JPEG exactly as served by the edge.
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatusResponse {
    pub connected: bool,
    pub last_update: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatestDataResponse {
    pub connected: bool,
    pub timestamp: Option<String>,
    pub segments: Vec<Segment>,
    pub total_volume: f64,
    pub has_image: bool,
}

/// Written only by the sync agent; read by request handlers.
#[derive(Debug, Default)]
pub struct RelayCache {
    inner: RwLock<CachedData>,
}

impl RelayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CachedData {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_write<R>(&self, f: impl FnOnce(&mut CachedData) -> R) -> R {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self.inner.read() {
            Ok(guard) => guard.connected,
            Err(poisoned) => poisoned.into_inner().connected,
        }
    }

    /// Record connectivity and return the previous value.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.with_write(|data| std::mem::replace(&mut data.connected, connected))
    }

    pub fn last_update(&self) -> Option<String> {
        self.snapshot().last_update
    }

    /// Replace the mirrored result. `image` is `None` when the edge reported
    /// no image for this timestamp.
    pub fn store_result(
        &self,
        timestamp: Option<String>,
        segments: Vec<Segment>,
        total_volume: f64,
        image: Option<String>,
    ) {
        self.with_write(|data| {
            data.last_update = timestamp;
            data.segments = segments;
            data.total_volume = total_volume;
            data.image = image;
        });
    }

    pub fn image(&self) -> Option<String> {
        match self.inner.read() {
            Ok(guard) => guard.image.clone(),
            Err(poisoned) => poisoned.into_inner().image.clone(),
        }
    }

    pub fn connection_status(&self) -> ConnectionStatusResponse {
        let data = self.snapshot();
        ConnectionStatusResponse {
            connected: data.connected,
            last_update: data.last_update,
        }
    }

    pub fn connection_status_event(&self) -> RelayEvent {
        let status = self.connection_status();
        RelayEvent::ConnectionStatus {
            connected: status.connected,
            last_update: status.last_update,
        }
    }

    pub fn latest_data(&self) -> LatestDataResponse {
        let data = self.snapshot();
        LatestDataResponse {
            connected: data.connected,
            timestamp: data.last_update,
            has_image: data.image.is_some(),
            segments: data.segments,
            total_volume: data.total_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_and_empty() {
        let cache = RelayCache::new();
        assert_eq!(
            cache.connection_status(),
            ConnectionStatusResponse {
                connected: false,
                last_update: None
            }
        );
        let latest = cache.latest_data();
        assert!(latest.segments.is_empty());
        assert!(!latest.has_image);
        assert_eq!(latest.total_volume, 0.0);
    }

    #[test]
    fn set_connected_reports_previous_value() {
        let cache = RelayCache::new();
        assert!(!cache.set_connected(true));
        assert!(cache.set_connected(true));
        assert!(cache.is_connected());
    }

    #[test]
    fn result_without_image_clears_the_old_one() {
        let cache = RelayCache::new();
        cache.store_result(Some("a".into()), Vec::new(), 1.0, Some("AQID".into()));
        assert!(cache.latest_data().has_image);
        cache.store_result(Some("b".into()), Vec::new(), 2.0, None);
        assert!(cache.image().is_none());
        assert_eq!(cache.last_update().as_deref(), Some("b"));
    }
}
