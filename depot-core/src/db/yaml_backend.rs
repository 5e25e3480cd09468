//! YAML file storage backend
//!
//! This backend stores all data in a single YAML file, using the
//! Storage implementation with file locking support.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::traits::{BackendType, DatabaseBackend};
use crate::models::DepotStore;
use crate::storage::Storage;

/// YAML file backend implementation
///
/// Every per-record write reads and rewrites the whole file under one
/// exclusive lock, so concurrent writers do not lose each other's records.
/// A check followed by a save is still two steps: two processes validating
/// and then saving a transfer request can both pass the open-transfer check.
/// Use the SQLite backend when several writers share a repository.
pub struct YamlBackend {
    storage: Storage,
    path: PathBuf,
}

impl YamlBackend {
    /// Creates a new YAML backend for the given file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            storage: Storage::new(&path),
            path,
        }
    }
}

impl DatabaseBackend for YamlBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Yaml
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<DepotStore> {
        self.storage.load()
    }

    fn save(&self, store: &DepotStore) -> Result<()> {
        self.storage.save(store)
    }

    fn update_atomically(
        &self,
        update_fn: &mut dyn FnMut(&mut DepotStore) -> Result<()>,
    ) -> Result<()> {
        self.storage.update_atomically(|store| update_fn(store))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransferRequest, User, Work};
    use tempfile::TempDir;

    #[test]
    fn test_yaml_backend_create_and_load() {
        // Use a path that doesn't exist yet
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.yaml");
        let backend = YamlBackend::new(&file_path);

        backend.create_if_not_exists().unwrap();

        let store = backend.load().unwrap();
        assert!(store.works.is_empty());
        assert!(store.users.is_empty());
    }

    #[test]
    fn test_yaml_backend_record_operations() {
        let temp_dir = TempDir::new().unwrap();
        let backend = YamlBackend::new(temp_dir.path().join("test.yaml"));

        let alice = backend.add_user(User::new("alice@example.org", "Alice")).unwrap();
        assert!(backend.add_user(User::new("alice@example.org", "Imposter")).is_err());

        let mut parent = Work::new("Parent");
        let child = Work::new("Child");
        parent.push_member(child.id);
        backend.save_work(&child).unwrap();
        backend.save_work(&parent).unwrap();

        assert_eq!(backend.in_works_ids(&child.id).unwrap(), vec![parent.id]);

        let request = TransferRequest::new(child.id, alice.id, uuid::Uuid::new_v4(), None);
        backend.save_transfer_request(&request).unwrap();
        let open = backend.open_transfer_for_work(&child.id, None).unwrap();
        assert_eq!(open.map(|r| r.id), Some(request.id));

        assert!(backend.destroy_work(&child.id).unwrap());
        assert!(backend.get_work(&parent.id).unwrap().unwrap().ordered_member_ids.is_empty());

        let stats = backend.stats().unwrap();
        assert_eq!(stats.work_count, 1);
        assert_eq!(stats.open_transfer_count, 1);
    }

    #[test]
    fn test_concurrent_writers_keep_every_work() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.yaml");

        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let backend = YamlBackend::new(&path);
                    for i in 0..25 {
                        backend
                            .save_work(&Work::new(format!("writer {} work {}", writer, i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let backend = YamlBackend::new(&path);
        assert_eq!(backend.list_works().unwrap().len(), 100);
    }

    #[test]
    fn test_duplicate_user_key_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let backend = YamlBackend::new(temp_dir.path().join("test.yaml"));
        backend.add_user(User::new("alice@example.org", "Alice")).unwrap();

        assert!(backend.add_user(User::new("alice@example.org", "Again")).is_err());
        let users = backend.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "Alice");
    }
}
