//! Device settings: detection threshold and camera index.
//!
//! Updates are validated as a whole before anything changes, then persisted to
//! the settings file so the camera choice survives restarts.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use rebar_core::wire::{ConfigPatch, ConfigView};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_DETECTION_THRESHOLD: f64 = 0.7;

/// Highest index accepted; OpenCV addresses devices with an `i32`.
const MAX_CAMERA_INDEX: i64 = i32::MAX as i64;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_threshold")]
    pub detection_threshold: f64,
    #[serde(default)]
    pub camera_index: u32,
}

fn default_threshold() -> f64 {
    DEFAULT_DETECTION_THRESHOLD
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            camera_index: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("detection_threshold must be between 0 and 1, got {0}")]
    ThresholdOutOfRange(f64),
    #[error("external_camera_index must be non-negative, got {0}")]
    NegativeCameraIndex(i64),
    #[error("external_camera_index {0} is out of range")]
    CameraIndexTooLarge(i64),
}

impl DeviceConfig {
    /// Return the config with `patch` applied, or the first validation error.
    pub fn apply(&self, patch: &ConfigPatch) -> Result<Self, ConfigError> {
        let mut next = *self;
        if let Some(threshold) = patch.detection_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::ThresholdOutOfRange(threshold));
            }
            next.detection_threshold = threshold;
        }
        if let Some(index) = patch.external_camera_index {
            if index < 0 {
                return Err(ConfigError::NegativeCameraIndex(index));
            }
            if index > MAX_CAMERA_INDEX {
                return Err(ConfigError::CameraIndexTooLarge(index));
            }
            next.camera_index = index as u32;
        }
        Ok(next)
    }

    pub fn view(&self) -> ConfigView {
        ConfigView {
            detection_threshold: self.detection_threshold,
            camera_enabled: true,
            external_camera_index: self.camera_index,
        }
    }
}

/// Result of an accepted update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfigChange {
    pub previous: DeviceConfig,
    pub current: DeviceConfig,
}

impl ConfigChange {
    pub fn camera_changed(&self) -> bool {
        self.previous.camera_index != self.current.camera_index
    }
}

/// Shared, persisted `DeviceConfig`.
#[derive(Debug)]
pub struct DeviceSettings {
    current: RwLock<DeviceConfig>,
    path: Option<PathBuf>,
}

impl DeviceSettings {
    /// Settings that are never written to disk.
    pub fn in_memory(config: DeviceConfig) -> Self {
        Self {
            current: RwLock::new(config),
            path: None,
        }
    }

    /// Load `path`, creating it with defaults when absent. An unreadable file
    /// falls back to defaults without being overwritten.
    pub fn load_or_create(path: &Path) -> Self {
        let config = if path.exists() {
            match fs::read_to_string(path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| Ok(serde_json::from_str::<DeviceConfig>(&raw)?))
            {
                Ok(config) => {
                    info!("loaded camera index {} from {}", config.camera_index, path.display());
                    config
                }
                Err(err) => {
                    warn!("error loading camera settings from {}: {err}", path.display());
                    DeviceConfig::default()
                }
            }
        } else {
            let config = DeviceConfig::default();
            match write_settings(path, &config) {
                Ok(()) => info!("created default camera settings file {}", path.display()),
                Err(err) => warn!("failed to create {}: {err}", path.display()),
            }
            config
        };
        let config = if (0.0..=1.0).contains(&config.detection_threshold) {
            config
        } else {
            warn!("stored detection threshold out of range; using default");
            DeviceConfig {
                detection_threshold: DEFAULT_DETECTION_THRESHOLD,
                ..config
            }
        };

        Self {
            current: RwLock::new(config),
            path: Some(path.to_path_buf()),
        }
    }

    pub fn current(&self) -> DeviceConfig {
        match self.current.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Validate and apply `patch` atomically, then persist the result.
    /// Persistence failures are logged; the in-memory update stands.
    pub fn update(&self, patch: &ConfigPatch) -> Result<ConfigChange, ConfigError> {
        let change = {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let previous = *guard;
            let current = previous.apply(patch)?;
            *guard = current;
            ConfigChange { previous, current }
        };

        if let Some(path) = &self.path {
            if let Err(err) = write_settings(path, &change.current) {
                warn!("failed to save camera settings to {}: {err}", path.display());
            }
        }
        Ok(change)
    }
}

fn write_settings(path: &Path, config: &DeviceConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("rebar-settings-{}-{name}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join("camera_settings.json")
    }

    #[test]
    fn out_of_range_threshold_leaves_config_unchanged() {
        let settings = DeviceSettings::in_memory(DeviceConfig::default());
        let err = settings
            .update(&ConfigPatch {
                detection_threshold: Some(1.5),
                external_camera_index: Some(2),
            })
            .unwrap_err();
        assert_eq!(err, ConfigError::ThresholdOutOfRange(1.5));
        assert_eq!(settings.current(), DeviceConfig::default());
    }

    #[test]
    fn negative_camera_index_is_rejected() {
        let settings = DeviceSettings::in_memory(DeviceConfig::default());
        let err = settings
            .update(&ConfigPatch {
                detection_threshold: Some(0.4),
                external_camera_index: Some(-1),
            })
            .unwrap_err();
        assert_eq!(err, ConfigError::NegativeCameraIndex(-1));
        assert_eq!(settings.current().detection_threshold, DEFAULT_DETECTION_THRESHOLD);
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let settings = DeviceSettings::in_memory(DeviceConfig {
            detection_threshold: 0.6,
            camera_index: 3,
        });
        let change = settings
            .update(&ConfigPatch {
                detection_threshold: Some(0.8),
                external_camera_index: None,
            })
            .unwrap();
        assert!(!change.camera_changed());
        assert_eq!(settings.current().camera_index, 3);
        assert_eq!(settings.current().detection_threshold, 0.8);
    }

    #[test]
    fn missing_file_is_created_and_updates_persist() {
        let path = temp_path("persist");
        fs::remove_file(&path).ok();

        let settings = DeviceSettings::load_or_create(&path);
        assert!(path.exists());
        assert_eq!(settings.current(), DeviceConfig::default());

        let change = settings
            .update(&ConfigPatch {
                detection_threshold: None,
                external_camera_index: Some(1),
            })
            .unwrap();
        assert!(change.camera_changed());

        let reloaded = DeviceSettings::load_or_create(&path);
        assert_eq!(reloaded.current().camera_index, 1);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn file_with_only_camera_index_loads() {
        let path = temp_path("legacy");
        fs::write(&path, r#"{"camera_index": 2}"#).unwrap();
        let settings = DeviceSettings::load_or_create(&path);
        assert_eq!(settings.current().camera_index, 2);
        assert_eq!(settings.current().detection_threshold, DEFAULT_DETECTION_THRESHOLD);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn config_view_reports_camera_enabled() {
        let view = DeviceConfig::default().view();
        assert!(view.camera_enabled);
        assert_eq!(view.external_camera_index, 0);
        assert_eq!(view.detection_threshold, 0.7);
    }
}
