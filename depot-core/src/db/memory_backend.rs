//! In-process storage backend
//!
//! Keeps the whole store behind a mutex. Used for embedding depot in
//! another process and for tests that do not need files on disk.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{BackendType, DatabaseBackend};
use crate::models::DepotStore;

pub struct MemoryBackend {
    store: Mutex<DepotStore>,
    path: PathBuf,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_store(DepotStore::new())
    }

    /// Starts from an existing store
    pub fn with_store(store: DepotStore) -> Self {
        Self {
            store: Mutex::new(store),
            path: PathBuf::from(":memory:"),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBackend for MemoryBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<DepotStore> {
        let store = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))?;
        Ok(store.clone())
    }

    fn save(&self, store: &DepotStore) -> Result<()> {
        let mut current = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))?;
        *current = store.clone();
        Ok(())
    }

    fn update_atomically(
        &self,
        update_fn: &mut dyn FnMut(&mut DepotStore) -> Result<()>,
    ) -> Result<()> {
        let mut current = self
            .store
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))?;
        let mut updated = current.clone();
        update_fn(&mut updated)?;
        *current = updated;
        Ok(())
    }

    fn exists(&self) -> bool {
        true
    }
}
