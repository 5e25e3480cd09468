//! Works out which store a command operates on

use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::registry::{get_registry_path, Registry};

pub const REPO_ENV: &str = "DEPOT_REPO";
pub const LOCAL_STORE_FILE: &str = "depot.yaml";

/// Resolves the store path
///
/// In order: the `--repo` option, `DEPOT_REPO`, a `depot.yaml` in the
/// current directory, then the registry's only or default entry. A
/// repository name is looked up in the registry; anything else is taken as
/// a path.
pub fn determine_repository_path(repo_option: Option<&str>) -> Result<PathBuf> {
    let registry = Registry::load_or_default(get_registry_path()?)?;
    resolve(&registry, repo_option, env::var(REPO_ENV).ok().as_deref())
}

fn resolve(registry: &Registry, repo_option: Option<&str>, repo_env: Option<&str>) -> Result<PathBuf> {
    if let Some(repo) = repo_option.or(repo_env) {
        return Ok(named_or_path(registry, repo));
    }

    let local = PathBuf::from(LOCAL_STORE_FILE);
    if local.exists() {
        return Ok(local);
    }

    if let Some(entry) = registry.implicit() {
        return Ok(PathBuf::from(&entry.path));
    }

    if registry.repositories.is_empty() {
        // First run: start a store in the current directory
        return Ok(local);
    }

    anyhow::bail!(
        "Several repositories are registered ({}); pick one with --repo or {}",
        registry.names().join(", "),
        REPO_ENV
    )
}

fn named_or_path(registry: &Registry, repo: &str) -> PathBuf {
    match registry.get(repo) {
        Some(entry) => PathBuf::from(&entry.path),
        None => PathBuf::from(repo),
    }
}
