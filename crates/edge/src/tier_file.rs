//! Tiers file handling: default creation on first start and reload when the
//! file changes on disk.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use anyhow::{Context, Result};
use rebar_core::{MeasurementEngine, TierSet};
use tracing::{info, warn};

/// Load the tier set from `path`, writing the default tiers there first when
/// the file does not exist.
pub fn load_or_create(path: &Path) -> Result<TierSet> {
    if !path.exists() {
        let tiers = TierSet::default();
        let json = tiers.to_json_pretty()?;
        fs::write(path, json)
            .with_context(|| format!("failed to create tiers file {}", path.display()))?;
        info!("created default cement ratios file {}", path.display());
        return Ok(tiers);
    }
    TierSet::load(path).with_context(|| format!("invalid tiers file {}", path.display()))
}

/// Swaps the engine's tiers when the file's modification time moves.
pub struct TierFileWatcher {
    path: PathBuf,
    engine: Arc<MeasurementEngine>,
    last_modified: Option<SystemTime>,
}

impl TierFileWatcher {
    pub fn new(path: impl Into<PathBuf>, engine: Arc<MeasurementEngine>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            engine,
            last_modified,
        }
    }

    /// Reload if changed. Returns `true` when a new tier set was installed; an
    /// invalid file keeps the previous tiers active.
    pub fn refresh(&mut self) -> bool {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return false;
        }
        self.last_modified = current;

        match TierSet::load(&self.path) {
            Ok(tiers) => {
                info!(
                    "reloaded {} tiers from {}",
                    tiers.tiers().len(),
                    self.path.display()
                );
                self.engine.replace_tiers(tiers);
                true
            }
            Err(err) => {
                warn!(
                    "ignoring invalid tiers file {}: {err}; previous tiers stay active",
                    self.path.display()
                );
                false
            }
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
