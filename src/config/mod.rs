//! Configuration management for buildstash

pub mod schema;

pub use schema::Config;

use crate::error::{StashError, StashResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the project-local config file
pub const LOCAL_CONFIG_NAME: &str = ".buildstash.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buildstash")
            .join("config.toml")
    }

    /// Default cache root when `store.root` is unset
    pub fn default_store_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buildstash")
            .join("store")
    }

    /// Cache root configured in `config`, or the default
    pub fn store_root(config: &Config) -> PathBuf {
        config
            .store
            .root
            .clone()
            .unwrap_or_else(Self::default_store_root)
    }

    /// Find `.buildstash.toml` in `start` or one of its ancestors
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> StashResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StashResult<Config> {
        let value = read_table(path).await?;
        value.try_into().map_err(|e: toml::de::Error| StashError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the global config with a project-local file layered on top
    ///
    /// Tables merge key by key; any other value in the local file, including
    /// the `caches` array, replaces the global one.
    pub async fn load_merged(&self, local: Option<&Path>) -> StashResult<Config> {
        let Some(local) = local else {
            return self.load().await;
        };

        let mut merged = if self.config_path.exists() {
            read_table(&self.config_path).await?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };
        merge_values(&mut merged, read_table(local).await?);

        merged
            .try_into()
            .map_err(|e: toml::de::Error| StashError::ConfigInvalid {
                path: local.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StashResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            StashError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> StashResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StashError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_table(path: &Path) -> StashResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StashError::io(format!("reading config from {}", path.display()), e))?;

    toml::from_str::<toml::Table>(&content)
        .map(toml::Value::Table)
        .map_err(|e| StashError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
