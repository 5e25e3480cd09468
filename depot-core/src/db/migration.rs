//! Migration utilities for converting between storage backends
//!
//! This module provides functions to migrate data between YAML and SQLite backends,
//! as well as import/export to JSON format for interoperability.

use anyhow::{Context, Result};
use std::path::Path;

use super::traits::DatabaseBackend;
use super::{SqliteBackend, YamlBackend};
use crate::models::DepotStore;

/// Migrates data from a YAML file to a SQLite database
///
/// Returns the number of works migrated. Fails if the YAML store holds two
/// open transfers for one work, which the SQLite schema refuses.
pub fn migrate_yaml_to_sqlite<P1: AsRef<Path>, P2: AsRef<Path>>(
    yaml_path: P1,
    sqlite_path: P2,
) -> Result<usize> {
    let yaml_backend = YamlBackend::new(yaml_path);
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;

    let store = yaml_backend
        .load()
        .context("Failed to load YAML database")?;
    let work_count = store.works.len();

    sqlite_backend
        .save(&store)
        .context("Failed to save to SQLite database")?;

    log::info!("migrated {} works from YAML to SQLite", work_count);
    Ok(work_count)
}

/// Migrates data from a SQLite database to a YAML file
///
/// Returns the number of works migrated
pub fn migrate_sqlite_to_yaml<P1: AsRef<Path>, P2: AsRef<Path>>(
    sqlite_path: P1,
    yaml_path: P2,
) -> Result<usize> {
    let sqlite_backend = SqliteBackend::new(sqlite_path)?;
    let yaml_backend = YamlBackend::new(yaml_path);

    let store = sqlite_backend
        .load()
        .context("Failed to load SQLite database")?;
    let work_count = store.works.len();

    yaml_backend
        .save(&store)
        .context("Failed to save to YAML file")?;

    log::info!("migrated {} works from SQLite to YAML", work_count);
    Ok(work_count)
}

/// Exports a DepotStore to a JSON file
pub fn export_to_json<P: AsRef<Path>>(store: &DepotStore, json_path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(store).context("Failed to serialize to JSON")?;

    std::fs::write(json_path, json).context("Failed to write JSON file")?;

    Ok(())
}

/// Imports a DepotStore from a JSON file
pub fn import_from_json<P: AsRef<Path>>(json_path: P) -> Result<DepotStore> {
    let json = std::fs::read_to_string(json_path).context("Failed to read JSON file")?;

    let store: DepotStore = serde_json::from_str(&json).context("Failed to parse JSON")?;

    Ok(store)
}

/// Exports data from any backend to a JSON file
pub fn export_backend_to_json<P: AsRef<Path>>(
    backend: &dyn DatabaseBackend,
    json_path: P,
) -> Result<()> {
    let store = backend.load()?;
    export_to_json(&store, json_path)
}

/// Imports data from a JSON file into any backend
pub fn import_json_to_backend<P: AsRef<Path>>(
    json_path: P,
    backend: &dyn DatabaseBackend,
) -> Result<()> {
    let store = import_from_json(json_path)?;
    backend.save(&store)
}
