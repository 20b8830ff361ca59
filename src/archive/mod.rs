//! Archive strategies for moving cached trees across the execution boundary
//!
//! A strategy decides how a directory tree becomes one blob in the store and
//! back. Every compress or uncompress is a single remote call; the bytes
//! stream between the nodes without being buffered whole.

mod tarball;

pub use tarball::TarArchiveStrategy;

use crate::cache::FilterSpec;
use crate::error::StashResult;
use crate::remote::ExecutionContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Codec applied to the tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// gzip (`.tgz`)
    #[default]
    Gzip,
    /// zstd (`.tar.zst`)
    Zstd,
    /// Uncompressed tar (`.tar`)
    None,
}

impl Compression {
    /// Archive file suffix for this codec
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => ".tgz",
            Self::Zstd => ".tar.zst",
            Self::None => ".tar",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Pluggable scheme for serializing a directory tree to a single blob
#[async_trait]
pub trait ArchiveStrategy: Send + Sync {
    /// Suffix of the blob file, e.g. `.tgz`
    fn extension(&self) -> &'static str;

    /// Archive the filtered contents of `source_dir` on the execution node
    /// into `target_file` on the control node
    ///
    /// On failure `target_file` is left untouched.
    async fn compress(
        &self,
        ctx: &ExecutionContext,
        source_dir: &Path,
        filter: &FilterSpec,
        target_file: &Path,
    ) -> StashResult<()>;

    /// Unpack `archive_file` from the control node into `target_dir` on the
    /// execution node, creating it and overwriting conflicting entries
    async fn uncompress(
        &self,
        ctx: &ExecutionContext,
        archive_file: &Path,
        target_dir: &Path,
    ) -> StashResult<()>;
}

/// Create the archive strategy configured for a cache
pub fn create_strategy(compression: Compression) -> Box<dyn ArchiveStrategy> {
    Box::new(TarArchiveStrategy::new(compression))
}
