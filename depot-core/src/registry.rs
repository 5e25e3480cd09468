//! Registry of named depot repositories
//!
//! A small YAML file mapping repository names to store paths, with an
//! optional default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const REGISTRY_PATH_ENV: &str = "DEPOT_REGISTRY_PATH";
const REGISTRY_FILE_NAME: &str = ".depot.config";

/// One registered store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryEntry {
    /// Path to the store file (`.yaml` or `.db`)
    pub path: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryEntry>,
    #[serde(default)]
    pub default_repository: Option<String>,
}

impl Registry {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read registry file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse registry file: {:?}", path.as_ref()))
    }

    /// Loads the registry, or an empty one when the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.repositories.keys().map(|k| k.as_str()).collect()
    }

    /// Registers a repository or replaces an existing entry of that name
    pub fn register(&mut self, name: impl Into<String>, path: impl Into<String>, description: impl Into<String>) {
        self.repositories.insert(
            name.into(),
            RepositoryEntry {
                path: path.into(),
                description: description.into(),
            },
        );
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.repositories.contains_key(name) {
            anyhow::bail!("Repository '{}' not found in registry", name);
        }
        self.default_repository = Some(name.to_string());
        Ok(())
    }

    pub fn get_default(&self) -> Option<(&str, &RepositoryEntry)> {
        let name = self.default_repository.as_deref()?;
        self.repositories.get_key_value(name).map(|(k, v)| (k.as_str(), v))
    }

    /// The entry to use when none was named: the only one, else the default
    pub fn implicit(&self) -> Option<&RepositoryEntry> {
        if self.repositories.len() == 1 {
            return self.repositories.values().next();
        }
        self.get_default().map(|(_, entry)| entry)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write registry to {:?}", path.as_ref()))?;
        log::debug!("wrote registry {:?}", path.as_ref());

        Ok(())
    }
}

/// Path of the registry file: `$DEPOT_REGISTRY_PATH`, else `~/.depot.config`
pub fn get_registry_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(REGISTRY_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home_dir = dirs::home_dir().context("Failed to determine home directory")?;
    Ok(home_dir.join(REGISTRY_FILE_NAME))
}
