//! Size probe for directories on the execution node

use super::StopFlag;
use crate::cache::FilterSpec;
use crate::error::{StashError, StashResult};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Total byte size of the regular files under `root` selected by `filter`
///
/// A missing root measures 0. Symlinks and directories contribute nothing.
/// Any I/O error during the walk fails the whole measurement.
pub fn measure(root: &Path, filter: &FilterSpec, stop: &StopFlag) -> StashResult<u64> {
    match fs::metadata(root) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Nothing to measure at {}", root.display());
            return Ok(0);
        }
        Err(e) => return Err(StashError::io(format!("reading {}", root.display()), e)),
    }

    let filter = filter.compile()?;
    let total = AtomicU64::new(0);

    filter.scan(root, |entry, _| {
        stop.check()?;
        if entry.file_type().is_file() {
            let metadata = entry
                .metadata()
                .map_err(|e| StashError::io(format!("reading {}", entry.path().display()), e.into()))?;
            total.fetch_add(metadata.len(), Ordering::Relaxed);
        }
        Ok(())
    })?;

    let total = total.into_inner();
    debug!("Measured {} bytes under {}", total, root.display());
    Ok(total)
}
