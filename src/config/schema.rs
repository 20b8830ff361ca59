//! Configuration schema for buildstash
//!
//! Configuration is stored at `~/.config/buildstash/config.toml`, with
//! per-project overrides in `.buildstash.toml`.

use crate::archive::Compression;
use crate::cache::FilterSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Control-node store settings
    pub store: StoreConfig,

    /// How to reach the execution node
    pub executor: ExecutorConfig,

    /// Directories to cache
    pub caches: Vec<CacheConfig>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cache root on the control node (default: platform data dir)
    pub root: Option<PathBuf>,

    /// Skip saving when the caches measure more than this (0 = unlimited)
    pub max_size_mb: u64,
}

/// Execution channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Workspace is on this machine
    #[default]
    Local,
    /// Workspace is reached through a `buildstash agent` child process
    Process,
}

/// Executor settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub kind: ExecutorKind,

    /// Command that starts the agent, e.g. `["ssh", "builder", "buildstash", "agent"]`
    pub command: Vec<String>,

    /// Workspace directory on the execution node
    pub workspace: Option<PathBuf>,
}

/// One `[[caches]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache type identifier
    #[serde(rename = "type")]
    pub kind: String,

    /// Directory to cache, relative to the workspace; may use `$VAR`
    pub path: String,

    /// Comma or whitespace separated include globs (empty = everything)
    pub includes: String,

    /// Comma or whitespace separated exclude globs
    pub excludes: String,

    /// Also exclude VCS and editor files
    pub use_default_excludes: bool,

    /// Archive codec
    pub compression: Compression,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: "arbitrary".to_string(),
            path: String::new(),
            includes: String::new(),
            excludes: String::new(),
            use_default_excludes: true,
            compression: Compression::default(),
        }
    }
}

impl CacheConfig {
    pub fn filter(&self) -> FilterSpec {
        FilterSpec::new(
            self.includes.clone(),
            self.excludes.clone(),
            self.use_default_excludes,
        )
    }
}
