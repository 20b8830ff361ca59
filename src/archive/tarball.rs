//! Tar-based archive strategy

use super::{ArchiveStrategy, Compression};
use crate::cache::FilterSpec;
use crate::error::{StashError, StashResult};
use crate::remote::{ExecutionContext, Request};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Tar archive with a configurable codec
#[derive(Debug, Clone, Copy)]
pub struct TarArchiveStrategy {
    compression: Compression,
}

impl TarArchiveStrategy {
    /// Create a tar strategy for the given codec
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

/// Sibling of `target` that receives the stream until it is complete
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    target.with_file_name(format!("{}.{}.partial", name, Uuid::new_v4().simple()))
}

#[async_trait]
impl ArchiveStrategy for TarArchiveStrategy {
    fn extension(&self) -> &'static str {
        self.compression.extension()
    }

    async fn compress(
        &self,
        ctx: &ExecutionContext,
        source_dir: &Path,
        filter: &FilterSpec,
        target_file: &Path,
    ) -> StashResult<()> {
        let partial = partial_path(target_file);
        let request = Request::CreateArchive {
            source: source_dir.to_path_buf(),
            filter: filter.clone(),
            compression: self.compression,
        };

        let streamed = match ctx.invoke(request, Some(&partial)).await {
            Ok(response) => response.expect_done(),
            Err(e) => Err(e),
        };

        if let Err(e) = streamed {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!("Could not remove {}: {}", partial.display(), cleanup);
            }
            return Err(e);
        }

        fs::rename(&partial, target_file).await.map_err(|e| {
            StashError::io(
                format!("moving archive into place at {}", target_file.display()),
                e,
            )
        })?;

        debug!("Wrote {} archive {}", self.compression, target_file.display());
        Ok(())
    }

    async fn uncompress(
        &self,
        ctx: &ExecutionContext,
        archive_file: &Path,
        target_dir: &Path,
    ) -> StashResult<()> {
        let request = Request::ExtractArchive {
            target: target_dir.to_path_buf(),
            compression: self.compression,
        };
        ctx.invoke(request, Some(archive_file)).await?.expect_done()
    }
}
