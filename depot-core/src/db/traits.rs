//! Database abstraction traits
//!
//! This module defines the core trait that all storage backends must implement.

use anyhow::Result;
use uuid::Uuid;

use crate::error::{DepotError, DepotResult};
use crate::models::{DepotStore, TransferRequest, User, Work};

/// Types of database backends available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// YAML file storage (single file)
    Yaml,
    /// SQLite database storage
    Sqlite,
    /// Process-local storage, nothing written to disk. Only built directly
    /// through [`super::MemoryBackend`], never from a path.
    Memory,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Yaml => write!(f, "YAML"),
            BackendType::Sqlite => write!(f, "SQLite"),
            BackendType::Memory => write!(f, "memory"),
        }
    }
}

/// Core trait for database backends
///
/// `load()` and `save()` work with the full `DepotStore`. The per-record
/// operations default to load/modify/save; backends override them where they
/// can do better.
///
/// Each record save stands alone. Nothing here groups several saves into one
/// transaction, so callers that save several records (membership
/// reconciliation) can leave partial results behind on failure.
pub trait DatabaseBackend: Send + Sync {
    /// Returns the backend type
    fn backend_type(&self) -> BackendType;

    /// Returns the path to the database file
    fn path(&self) -> &std::path::Path;

    // =========================================================================
    // Full Store Operations
    // =========================================================================

    /// Loads the entire store from the database
    fn load(&self) -> Result<DepotStore>;

    /// Saves the entire store to the database
    fn save(&self, store: &DepotStore) -> Result<()>;

    /// Applies `update_fn` to the stored data and writes the result back
    ///
    /// Nothing is written when `update_fn` fails. The default is a plain
    /// load then save; backends shared between writers override it to hold
    /// one lock across both.
    fn update_atomically(
        &self,
        update_fn: &mut dyn FnMut(&mut DepotStore) -> Result<()>,
    ) -> Result<()> {
        let mut store = self.load()?;
        update_fn(&mut store)?;
        self.save(&store)
    }

    // =========================================================================
    // Work Operations
    // =========================================================================

    /// Gets a work by its UUID
    fn get_work(&self, id: &Uuid) -> Result<Option<Work>> {
        let store = self.load()?;
        Ok(store.get_work(id).cloned())
    }

    /// Lists all works
    fn list_works(&self) -> Result<Vec<Work>> {
        Ok(self.load()?.works)
    }

    /// Inserts or replaces a work
    fn save_work(&self, work: &Work) -> Result<()> {
        self.update_atomically(&mut |store| {
            store.upsert_work(work.clone());
            Ok(())
        })
    }

    /// Deletes a work and detaches it from its parents.
    /// Returns false if the work did not exist.
    fn destroy_work(&self, id: &Uuid) -> Result<bool> {
        let mut removed = false;
        self.update_atomically(&mut |store| {
            removed = store.remove_work(id);
            Ok(())
        })?;
        Ok(removed)
    }

    /// IDs of the works that list `id` among their ordered members
    fn in_works_ids(&self, id: &Uuid) -> Result<Vec<Uuid>> {
        Ok(self.load()?.in_works_ids(id))
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Gets a user by UUID
    fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        let store = self.load()?;
        Ok(store.get_user(id).cloned())
    }

    /// Gets a user by login key
    fn get_user_by_key(&self, user_key: &str) -> Result<Option<User>> {
        let store = self.load()?;
        Ok(store.get_user_by_key(user_key).cloned())
    }

    /// Lists all users
    fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.load()?.users)
    }

    /// Adds a new user, refusing duplicate keys
    fn add_user(&self, user: User) -> Result<User> {
        self.update_atomically(&mut |store| {
            if store.get_user_by_key(&user.user_key).is_some() {
                anyhow::bail!("User key already taken: {}", user.user_key)
            }
            store.users.push(user.clone());
            Ok(())
        })?;
        Ok(user)
    }

    // =========================================================================
    // Transfer Request Operations
    // =========================================================================

    /// Gets a transfer request by UUID
    fn get_transfer_request(&self, id: &Uuid) -> Result<Option<TransferRequest>> {
        let store = self.load()?;
        Ok(store.get_transfer_request(id).cloned())
    }

    /// Lists all transfer requests, oldest first
    fn list_transfer_requests(&self) -> Result<Vec<TransferRequest>> {
        let mut requests = self.load()?.transfer_requests;
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    /// Inserts or replaces a transfer request
    fn save_transfer_request(&self, request: &TransferRequest) -> Result<()> {
        self.update_atomically(&mut |store| {
            store.upsert_transfer_request(request.clone());
            Ok(())
        })
    }

    /// The pending request on `work_id`, other than `excluding`
    fn open_transfer_for_work(
        &self,
        work_id: &Uuid,
        excluding: Option<&Uuid>,
    ) -> Result<Option<TransferRequest>> {
        let store = self.load()?;
        Ok(store.open_transfer_for_work(work_id, excluding).cloned())
    }

    // =========================================================================
    // Utility Operations
    // =========================================================================

    /// Returns true if the database file exists
    fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Creates the database with default/empty data if it doesn't exist
    fn create_if_not_exists(&self) -> Result<()> {
        if !self.exists() {
            self.save(&DepotStore::new())?;
        }
        Ok(())
    }

    /// Returns statistics about the database
    fn stats(&self) -> Result<DatabaseStats> {
        let store = self.load()?;
        Ok(DatabaseStats {
            work_count: store.works.len(),
            user_count: store.users.len(),
            transfer_count: store.transfer_requests.len(),
            open_transfer_count: store
                .transfer_requests
                .iter()
                .filter(|t| t.is_pending())
                .count(),
            backend_type: self.backend_type(),
        })
    }
}

/// Typed lookups layered over [`DatabaseBackend`]
///
/// These turn a missing record into the matching [`DepotError`] so callers
/// can propagate "not found" with `?`.
pub trait Repository {
    fn find_work(&self, id: &Uuid) -> DepotResult<Work>;
    fn find_user(&self, id: &Uuid) -> DepotResult<User>;
    fn find_user_by_key(&self, user_key: &str) -> DepotResult<User>;
    fn find_transfer_request(&self, id: &Uuid) -> DepotResult<TransferRequest>;
}

impl<B: DatabaseBackend + ?Sized> Repository for B {
    fn find_work(&self, id: &Uuid) -> DepotResult<Work> {
        self.get_work(id)?.ok_or(DepotError::WorkNotFound(*id))
    }

    fn find_user(&self, id: &Uuid) -> DepotResult<User> {
        self.get_user(id)?
            .ok_or_else(|| DepotError::UserNotFound(id.to_string()))
    }

    fn find_user_by_key(&self, user_key: &str) -> DepotResult<User> {
        self.get_user_by_key(user_key)?
            .ok_or_else(|| DepotError::UserNotFound(user_key.to_string()))
    }

    fn find_transfer_request(&self, id: &Uuid) -> DepotResult<TransferRequest> {
        self.get_transfer_request(id)?
            .ok_or(DepotError::TransferNotFound(*id))
    }
}

/// Statistics about a database
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub work_count: usize,
    pub user_count: usize,
    pub transfer_count: usize,
    pub open_transfer_count: usize,
    pub backend_type: BackendType,
}
