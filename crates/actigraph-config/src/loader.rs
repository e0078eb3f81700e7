//! Configuration loader with multi-source merging

use crate::{ActigraphConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "ACTIGRAPH".to_string(),
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "ACTIGRAPH")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<ActigraphConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = ActigraphConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/actigraph/config.toml)
        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Project config (actigraph.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (actigraph.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (ACTIGRAPH_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        // Build and deserialize
        let config = builder.build().context("Failed to build configuration")?;

        let mut actigraph_config: ActigraphConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Resolve relative paths
        actigraph_config.resolve_paths(&self.project_dir);

        Ok(actigraph_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> ActigraphConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
