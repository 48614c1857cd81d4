//! Mission persistence adapters.

use std::sync::Arc;

use thiserror::Error;

use crate::storage::{KeyValueStore, StorageError};

use super::state::MissionState;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("mission state encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Where mission runs are kept between sessions. The reducer never sees
/// this; any conforming adapter (local, remote, none) can be swapped in.
pub trait MissionPersistence: Send + Sync {
    fn load(&self, run_id: &str) -> PersistenceResult<Option<MissionState>>;
    fn save(&self, state: &MissionState) -> PersistenceResult<()>;
    fn clear(&self, run_id: &str) -> PersistenceResult<()>;

    fn list_runs(&self) -> PersistenceResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

impl MissionPersistence for NoopPersistence {
    fn load(&self, _run_id: &str) -> PersistenceResult<Option<MissionState>> {
        Ok(None)
    }

    fn save(&self, _state: &MissionState) -> PersistenceResult<()> {
        Ok(())
    }

    fn clear(&self, _run_id: &str) -> PersistenceResult<()> {
        Ok(())
    }
}

/// One JSON `MissionState` per run id in a key-value store, plus an index
/// of known runs.
pub struct StoragePersistence {
    storage: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl StoragePersistence {
    pub fn new(storage: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    fn run_key(&self, run_id: &str) -> String {
        format!("{}.run.{}", self.prefix, run_id)
    }

    fn index_key(&self) -> String {
        format!("{}.runs", self.prefix)
    }

    fn read_index(&self) -> PersistenceResult<Vec<String>> {
        match self.storage.get(&self.index_key())? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, runs: &[String]) -> PersistenceResult<()> {
        let raw = serde_json::to_string(runs)?;
        self.storage.set(&self.index_key(), &raw)?;
        Ok(())
    }
}

impl MissionPersistence for StoragePersistence {
    fn load(&self, run_id: &str) -> PersistenceResult<Option<MissionState>> {
        match self.storage.get(&self.run_key(run_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &MissionState) -> PersistenceResult<()> {
        let raw = serde_json::to_string(state)?;
        self.storage.set(&self.run_key(&state.run_id), &raw)?;

        let mut runs = self.read_index().unwrap_or_default();
        if !runs.contains(&state.run_id) {
            runs.push(state.run_id.clone());
            self.write_index(&runs)?;
        }
        Ok(())
    }

    fn clear(&self, run_id: &str) -> PersistenceResult<()> {
        self.storage.remove(&self.run_key(run_id))?;

        let mut runs = self.read_index().unwrap_or_default();
        let before = runs.len();
        runs.retain(|r| r != run_id);
        if runs.len() != before {
            self.write_index(&runs)?;
        }
        Ok(())
    }

    fn list_runs(&self) -> PersistenceResult<Vec<String>> {
        self.read_index()
    }
}
