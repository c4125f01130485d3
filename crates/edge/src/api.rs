//! Operations behind the edge HTTP endpoints, independent of actix.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rebar_core::{
    ResultStore,
    wire::{ConfigPatch, ConfigView, ImageResponse, LatestResponse, StatusResponse},
};
use tracing::{info, warn};

use crate::{
    controller::{CaptureController, TriggerError},
    settings::{ConfigError, DeviceSettings},
};

/// Answer to a capture request.
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureAck {
    Accepted,
    Unavailable(TriggerError),
}

#[derive(Clone)]
pub struct EdgeApi {
    controller: CaptureController,
    store: Arc<ResultStore>,
    settings: Arc<DeviceSettings>,
}

impl EdgeApi {
    pub fn new(
        controller: CaptureController,
        store: Arc<ResultStore>,
        settings: Arc<DeviceSettings>,
    ) -> Self {
        Self {
            controller,
            store,
            settings,
        }
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse::online(self.controller.camera_available(), self.store.has_results())
    }

    pub fn latest(&self) -> LatestResponse {
        LatestResponse::from_published(self.store.read().as_ref())
    }

    /// Base64 JPEG of the latest result, if one was rendered.
    pub fn latest_image(&self) -> Option<ImageResponse> {
        let published = self.store.read()?;
        let image = published.snapshot.image()?;
        Some(ImageResponse {
            image: STANDARD.encode(image),
        })
    }

    /// Start a run and return without waiting for it.
    pub fn trigger_capture(&self) -> CaptureAck {
        match self.controller.trigger() {
            Ok(_outcome) => CaptureAck::Accepted,
            Err(err) => {
                info!("capture request refused: {err}");
                CaptureAck::Unavailable(err)
            }
        }
    }

    pub fn get_config(&self) -> ConfigView {
        self.settings.current().view()
    }

    /// Apply a validated partial update. A camera change is queued on the
    /// worker ahead of any later capture.
    pub fn set_config(&self, patch: &ConfigPatch) -> Result<ConfigView, ConfigError> {
        let change = self.settings.update(patch)?;
        if change.previous.detection_threshold != change.current.detection_threshold {
            info!(
                "detection threshold {} -> {}",
                change.previous.detection_threshold, change.current.detection_threshold
            );
        }
        if change.camera_changed() {
            info!(
                "camera index {} -> {}",
                change.previous.camera_index, change.current.camera_index
            );
            if let Err(err) = self.controller.reinitialize(change.current.camera_index) {
                warn!("camera reinitialisation not queued: {err}");
            }
        }
        Ok(change.current.view())
    }

    pub fn preview_jpeg(&self) -> Option<Vec<u8>> {
        self.controller.preview_frame()
    }

    pub fn resume_preview(&self) {
        self.controller.resume_preview();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        controller::{
            spawn_capture_worker,
            tests::{FakeCamera, detecting_parts, fast_options},
        },
        settings::DeviceConfig,
    };

    fn api() -> (EdgeApi, FakeCamera, crate::controller::WorkerHandle) {
        let store = Arc::new(ResultStore::new());
        let camera = FakeCamera::default();
        let mut parts = detecting_parts(store.clone());
        let settings = Arc::new(DeviceSettings::in_memory(DeviceConfig::default()));
        parts.settings = settings.clone();
        let (controller, worker) = spawn_capture_worker(camera.clone(), parts, fast_options()).unwrap();
        (EdgeApi::new(controller, store, settings), camera, worker)
    }

    fn wait_for_results(api: &EdgeApi) {
        for _ in 0..200 {
            if api.status().has_results {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("capture never published");
    }

    #[test]
    fn empty_device_reports_no_data() {
        let (api, _camera, worker) = api();
        let status = api.status();
        assert!(status.is_online());
        assert!(!status.has_results);
        assert_eq!(api.latest(), LatestResponse::empty());
        assert!(api.latest_image().is_none());
        worker.stop();
    }

    #[test]
    fn capture_is_fire_and_forget_and_results_become_visible() {
        let (api, _camera, worker) = api();
        assert_eq!(api.trigger_capture(), CaptureAck::Accepted);
        wait_for_results(&api);

        let latest = api.latest();
        assert!(latest.timestamp.is_some());
        assert_eq!(latest.segments.len(), 2);
        assert!(latest.image_available);

        let image = api.latest_image().unwrap();
        let bytes = STANDARD.decode(image.image).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        worker.stop();
    }

    #[test]
    fn camera_change_reinitialises_worker() {
        let (api, camera, worker) = api();
        let view = api
            .set_config(&ConfigPatch {
                detection_threshold: Some(0.5),
                external_camera_index: Some(3),
            })
            .unwrap();
        assert_eq!(view.external_camera_index, 3);
        assert_eq!(api.get_config().detection_threshold, 0.5);

        worker.stop();
        assert_eq!(*camera.state.opens.lock().unwrap(), vec![0, 3]);
    }

    #[test]
    fn invalid_config_is_rejected_unchanged() {
        let (api, camera, worker) = api();
        let err = api
            .set_config(&ConfigPatch {
                detection_threshold: Some(1.5),
                external_camera_index: Some(1),
            })
            .unwrap_err();
        assert_eq!(err, ConfigError::ThresholdOutOfRange(1.5));
        assert_eq!(api.get_config(), DeviceConfig::default().view());

        worker.stop();
        assert_eq!(*camera.state.opens.lock().unwrap(), vec![0]);
    }
}
