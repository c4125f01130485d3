use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};

use crate::model::Snapshot;

/// The currently published snapshot and when it was published.
#[derive(Clone, Debug)]
pub struct Published {
    pub snapshot: Arc<Snapshot>,
    pub generation: u64,
    pub published_at: DateTime<Utc>,
}

/// Holder for the single most recent analysis result. Readers always see
/// either the previous or the new snapshot in full.
#[derive(Debug, Default)]
pub struct ResultStore {
    current: RwLock<Option<Published>>,
    generation: AtomicU64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot, returning its generation number.
    pub fn publish(&self, snapshot: Snapshot) -> u64 {
        let snapshot = Arc::new(snapshot);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *guard = Some(Published {
            snapshot,
            generation,
            published_at: Utc::now(),
        });
        generation
    }

    pub fn read(&self) -> Option<Published> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn has_results(&self) -> bool {
        self.read().is_some()
    }
}
