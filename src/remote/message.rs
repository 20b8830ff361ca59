//! Messages exchanged across the execution boundary

use crate::archive::Compression;
use crate::cache::FilterSpec;
use crate::error::{StashError, StashResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Work sent from the control node to the execution node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Total size of the filtered regular files under `root`
    MeasureSize { root: PathBuf, filter: FilterSpec },

    /// Create `path` and its parents
    EnsureDir { path: PathBuf },

    /// Stream an archive of `source` back to the control node
    CreateArchive {
        source: PathBuf,
        filter: FilterSpec,
        compression: Compression,
    },

    /// Receive an archive from the control node and unpack it into `target`
    ExtractArchive {
        target: PathBuf,
        compression: Compression,
    },

    /// Stop serving
    Shutdown,
}

/// Which way archive bytes flow for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    None,
    /// Execution node to control node
    Download,
    /// Control node to execution node
    Upload,
}

impl Request {
    /// Byte stream that accompanies this request
    pub fn transfer(&self) -> Transfer {
        match self {
            Self::CreateArchive { .. } => Transfer::Download,
            Self::ExtractArchive { .. } => Transfer::Upload,
            Self::MeasureSize { .. } | Self::EnsureDir { .. } | Self::Shutdown => Transfer::None,
        }
    }

    /// Short operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::MeasureSize { .. } => "measure_size",
            Self::EnsureDir { .. } => "ensure_dir",
            Self::CreateArchive { .. } => "create_archive",
            Self::ExtractArchive { .. } => "extract_archive",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Result sent from the execution node back to the control node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Size { bytes: u64 },
    Done,
    Failed { message: String },
}

impl Response {
    /// Turn a `Failed` response into an error
    pub fn into_result(self) -> StashResult<Self> {
        match self {
            Self::Failed { message } => Err(StashError::remote(message)),
            other => Ok(other),
        }
    }

    /// Expect a `Size` response
    pub fn expect_size(self) -> StashResult<u64> {
        match self.into_result()? {
            Self::Size { bytes } => Ok(bytes),
            other => Err(StashError::Protocol(format!(
                "expected a size response, got {:?}",
                other
            ))),
        }
    }

    /// Expect a `Done` response
    pub fn expect_done(self) -> StashResult<()> {
        match self.into_result()? {
            Self::Done => Ok(()),
            other => Err(StashError::Protocol(format!(
                "expected a done response, got {:?}",
                other
            ))),
        }
    }
}
