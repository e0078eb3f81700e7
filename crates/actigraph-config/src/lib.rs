//! Configuration management for actigraph
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (ACTIGRAPH_* prefix, highest precedence)
//! 2. actigraph.local.toml (gitignored, local overrides)
//! 3. actigraph.toml (git-tracked, project config)
//! 4. ~/.config/actigraph/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main actigraph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActigraphConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub secret: String,
    pub token_ttl_days: u64,
}

impl AuthConfig {
    /// Token lifetime as a duration.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_days * 24 * 60 * 60)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret-change-in-prod".to_string(),
            token_ttl_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".actigraph/data"),
        }
    }
}

impl ActigraphConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.storage.data_dir.is_relative() {
            self.storage.data_dir = base.join(&self.storage.data_dir);
        }
    }
}
