//! Database abstraction layer for depot repositories
//!
//! This module provides a trait-based abstraction for storage backends,
//! allowing the system to use different databases (YAML files, SQLite, etc.)
//! while maintaining a consistent interface.

mod memory_backend;
mod migration;
mod sqlite_backend;
mod traits;
mod yaml_backend;

pub use memory_backend::MemoryBackend;
pub use migration::{
    export_backend_to_json, export_to_json, import_from_json, import_json_to_backend,
    migrate_sqlite_to_yaml, migrate_yaml_to_sqlite,
};
pub use sqlite_backend::SqliteBackend;
pub use traits::{BackendType, DatabaseBackend, DatabaseStats, Repository};
pub use yaml_backend::YamlBackend;

use anyhow::Result;
use std::path::Path;

/// Infers the backend type from a file extension
pub fn infer_backend_type(path: &Path) -> BackendType {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => BackendType::Yaml,
        Some("db") | Some("sqlite") | Some("sqlite3") => BackendType::Sqlite,
        _ => BackendType::Yaml, // Default to YAML
    }
}

/// Creates a database backend based on the file extension or explicit type
pub fn create_backend(
    path: &Path,
    backend_type: Option<BackendType>,
) -> Result<Box<dyn DatabaseBackend>> {
    let bt = backend_type.unwrap_or_else(|| infer_backend_type(path));
    log::debug!("opening {} backend at {:?}", bt, path);

    match bt {
        BackendType::Yaml => Ok(Box::new(YamlBackend::new(path))),
        BackendType::Sqlite => Ok(Box::new(SqliteBackend::new(path)?)),
        BackendType::Memory => {
            anyhow::bail!("An in-memory store cannot be opened from {:?}", path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_infer_backend_type() {
        assert_eq!(infer_backend_type(&PathBuf::from("a.yaml")), BackendType::Yaml);
        assert_eq!(infer_backend_type(&PathBuf::from("a.yml")), BackendType::Yaml);
        assert_eq!(infer_backend_type(&PathBuf::from("a.db")), BackendType::Sqlite);
        assert_eq!(infer_backend_type(&PathBuf::from("a.sqlite3")), BackendType::Sqlite);
        assert_eq!(infer_backend_type(&PathBuf::from("depot")), BackendType::Yaml);
    }

    #[test]
    fn test_create_backend_refuses_memory() {
        let err = create_backend(&PathBuf::from("depot.yaml"), Some(BackendType::Memory)).err();
        assert!(err.is_some());

        let backend = create_backend(&PathBuf::from("/nonexistent/depot.yaml"), None).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Yaml);
    }
}
