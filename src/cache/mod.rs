//! Cache contract: seed before the build, save after it
//!
//! The store lives on the control node:
//!
//! ```text
//! <cache root>/<sha256 of cache key>/archive<ext>
//! ```
//!
//! A cache whose subdirectory (or blob) is missing has never been saved;
//! seeding it is a logged no-op.

pub mod arbitrary;
pub mod filter;
pub mod key;
pub mod size;

pub use arbitrary::{expand_vars, ArbitraryFileCache};
pub use filter::{CompiledFilter, FilterSpec, DEFAULT_EXCLUDES};
pub use key::{cache_key_digest, derive_cache_path};
pub use size::{format_bytes, SizeStatus};

use crate::archive::ArchiveStrategy;
use crate::config::schema::CacheConfig;
use crate::error::{StashError, StashResult};
use crate::remote::{ExecutionContext, Request};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// File name of the blob inside a cache subdirectory, before the extension
pub const ARCHIVE_STEM: &str = "archive";

/// Which way a transfer moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Store to execution node
    Seed,
    /// Execution node to store
    Save,
}

/// What a seed or save did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Seeded,
    /// Nothing stored yet for this key
    Skipped,
    Saved,
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Seeded => "seeded",
            Self::Skipped => "skipped",
            Self::Saved => "saved",
        };
        write!(f, "{}", s)
    }
}

/// A directory kept between builds
#[async_trait]
pub trait Cache: Send + Sync {
    /// Display label of the cache type
    fn title(&self) -> &'static str;

    /// Logical key naming this cache in the store
    fn key(&self) -> &str;

    /// Total size of the files a save would archive
    async fn calculate_size(&self, ctx: &ExecutionContext) -> StashResult<u64>;

    /// Restore the stored snapshot into the execution node
    ///
    /// `initial_env` is the build environment before the build ran.
    async fn seed(
        &self,
        cache_root: &Path,
        ctx: &ExecutionContext,
        initial_env: &BTreeMap<String, String>,
    ) -> StashResult<TransferOutcome>;

    /// Snapshot the execution node's directory into the store
    async fn save(&self, cache_root: &Path, ctx: &ExecutionContext) -> StashResult<TransferOutcome>;
}

/// Blob path for a strategy inside a cache subdirectory
pub fn archive_path(store_dir: &Path, strategy: &dyn ArchiveStrategy) -> PathBuf {
    store_dir.join(format!("{}{}", ARCHIVE_STEM, strategy.extension()))
}

/// Move one directory between the store and the execution node
///
/// `store_dir` is the cache subdirectory on the control node and `path` the
/// already resolved directory on the execution node.
pub async fn transfer_path(
    direction: Direction,
    store_dir: &Path,
    ctx: &ExecutionContext,
    path: &Path,
    filter: &FilterSpec,
    strategy: &dyn ArchiveStrategy,
) -> StashResult<TransferOutcome> {
    let archive = archive_path(store_dir, strategy);

    match direction {
        Direction::Seed => {
            let stored = fs::try_exists(&archive)
                .await
                .map_err(|e| StashError::io(format!("checking {}", archive.display()), e))?;
            if !stored {
                info!("Skip caching as no cache exists for {}", path.display());
                return Ok(TransferOutcome::Skipped);
            }

            ctx.invoke(
                Request::EnsureDir {
                    path: path.to_path_buf(),
                },
                None,
            )
            .await?
            .expect_done()?;
            strategy.uncompress(ctx, &archive, path).await?;

            info!("Seeded {} from {}", path.display(), archive.display());
            Ok(TransferOutcome::Seeded)
        }
        Direction::Save => {
            // Existing entries in store_dir are left in place
            fs::create_dir_all(store_dir)
                .await
                .map_err(|e| StashError::io(format!("creating {}", store_dir.display()), e))?;
            strategy.compress(ctx, path, filter, &archive).await?;

            info!("Saved {} to {}", path.display(), archive.display());
            Ok(TransferOutcome::Saved)
        }
    }
}

/// Build the cache described by a `[[caches]]` entry
pub fn create_cache(config: &CacheConfig) -> StashResult<Box<dyn Cache>> {
    match config.kind.as_str() {
        "arbitrary" => Ok(Box::new(ArbitraryFileCache::from_config(config))),
        other => Err(StashError::UnknownCacheType(other.to_string())),
    }
}
