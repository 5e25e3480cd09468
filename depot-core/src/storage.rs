use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::DepotStore;

/// How long to wait for another process to release the store
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles saving and loading the store from disk with file locking
/// for rudimentary multi-user support
pub struct Storage {
    file_path: PathBuf,
    lock_file_path: PathBuf,
}

impl Storage {
    /// Creates a new Storage instance
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let lock_file_path = file_path.with_extension("yaml.lock");
        Self {
            file_path,
            lock_file_path,
        }
    }

    /// Acquire an exclusive lock on the file for writing
    /// Returns the lock file handle which must be held during the operation
    fn acquire_write_lock(&self) -> Result<File> {
        if let Some(parent) = self.lock_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to create lock file: {:?}", self.lock_file_path))?;

        self.wait_for_lock(|| FileExt::try_lock_exclusive(&lock_file))?;
        Ok(lock_file)
    }

    /// Acquire a shared lock on the file for reading
    fn acquire_read_lock(&self) -> Result<Option<File>> {
        if !self.lock_file_path.exists() {
            return Ok(None);
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to open lock file: {:?}", self.lock_file_path))?;

        self.wait_for_lock(|| FileExt::try_lock_shared(&lock_file))?;
        Ok(Some(lock_file))
    }

    fn wait_for_lock<F>(&self, mut try_lock: F) -> Result<()>
    where
        F: FnMut() -> std::io::Result<()>,
    {
        let start = std::time::Instant::now();

        loop {
            match try_lock() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        anyhow::bail!(
                            "Timeout waiting for file lock - another user may be editing: {:?}",
                            self.file_path
                        );
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to acquire lock on {:?}", self.lock_file_path)
                    })
                }
            }
        }
    }

    fn write_lock_holder(lock_file: &mut File) {
        // Informational only
        let _ = writeln!(
            lock_file,
            "Locked by PID {} at {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
    }

    fn read_store(&self) -> Result<DepotStore> {
        let file = File::open(&self.file_path)
            .with_context(|| format!("Failed to open file: {:?}", self.file_path))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader)
            .with_context(|| format!("Failed to parse YAML from {:?}", self.file_path))
    }

    /// Loads the store from the YAML file with file locking
    pub fn load(&self) -> Result<DepotStore> {
        if !self.file_path.exists() {
            // Created under the write lock so a writer that got there first is kept
            let store = self.update_atomically(|_| Ok(()))?;
            log::debug!("created store at {:?}", self.file_path);
            return Ok(store);
        }

        let _lock = self.acquire_read_lock()?;
        let store = self.read_store()?;

        store.validate_unique_user_keys()?;

        Ok(store)
    }

    /// Saves the store to the YAML file with file locking
    pub fn save(&self, store: &DepotStore) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut lock_file = self.acquire_write_lock()?;
        Self::write_lock_holder(&mut lock_file);

        let yaml = serde_yaml::to_string(store)?;
        fs::write(&self.file_path, yaml)?;

        // Lock is automatically released when lock_file is dropped
        Ok(())
    }

    /// Reads, changes and writes the store under one exclusive lock
    ///
    /// Nothing is written when `update_fn` fails. A missing file starts out
    /// as an empty store.
    pub fn update_atomically<F>(&self, update_fn: F) -> Result<DepotStore>
    where
        F: FnOnce(&mut DepotStore) -> Result<()>,
    {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut lock_file = self.acquire_write_lock()?;
        Self::write_lock_holder(&mut lock_file);

        let mut store = if self.file_path.exists() {
            self.read_store()?
        } else {
            DepotStore::new()
        };
        update_fn(&mut store)?;
        store.validate_unique_user_keys()?;

        let yaml = serde_yaml::to_string(&store)?;
        fs::write(&self.file_path, yaml)?;

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{User, Work};
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("depot.yaml");
        let storage = Storage::new(&path);

        let store = storage.load().unwrap();
        assert!(store.works.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_update_atomically_persists() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("depot.yaml"));

        let work = Work::new("Atomic");
        let id = work.id;
        storage
            .update_atomically(|store| {
                store.upsert_work(work);
                Ok(())
            })
            .unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded.get_work(&id).unwrap().title, "Atomic");
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("depot.yaml"));
        storage.save(&DepotStore::new()).unwrap();

        let result = storage.update_atomically(|store| {
            store.upsert_work(Work::new("Discarded"));
            anyhow::bail!("refused")
        });

        assert!(result.is_err());
        assert!(storage.load().unwrap().works.is_empty());
    }

    #[test]
    fn test_concurrent_updates_keep_every_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("depot.yaml");

        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let storage = Storage::new(&path);
                    for i in 0..25 {
                        let work = Work::new(format!("writer {} work {}", writer, i));
                        storage
                            .update_atomically(|store| {
                                store.upsert_work(work);
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(Storage::new(&path).load().unwrap().works.len(), 100);
    }

    #[test]
    fn test_load_rejects_duplicate_user_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("depot.yaml"));

        let mut store = DepotStore::new();
        store.users.push(User::new("dup@example.org", "One"));
        store.users.push(User::new("dup@example.org", "Two"));
        storage.save(&store).unwrap();

        assert!(storage.load().is_err());
    }

    #[test]
    fn test_load_rejects_unknown_status() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("depot.yaml");
        let yaml = format!(
            "name: bad\ntransfer_requests:\n- id: {}\n  work_id: {}\n  sending_user: {}\n  receiving_user: {}\n  status: not_valid\n  created_at: 2024-01-01T00:00:00Z\n  updated_at: 2024-01-01T00:00:00Z\n",
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
        );
        fs::write(&path, yaml).unwrap();

        let err = Storage::new(&path).load().unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse YAML"));
    }
}
