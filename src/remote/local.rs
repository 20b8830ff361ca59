//! In-process execution channel

use super::message::{Request, Response, Transfer};
use super::ExecutionChannel;
use crate::error::{StashError, StashResult};
use crate::executor::{self, StopFlag, Stream};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Channel whose execution node is this process
///
/// Requests run on the tokio blocking pool. Dropping a dispatch, as an
/// interrupted [`super::ExecutionContext::invoke`] does, stops the request
/// at its next tree entry or block of archive bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalChannel;

impl LocalChannel {
    pub fn new() -> Self {
        Self
    }
}

/// Stops the blocking work when the dispatch future goes away
struct StopOnDrop(StopFlag);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Local blob that a transfer request reads or writes
pub(super) fn transfer_file<'a>(request: &Request, local_file: Option<&'a Path>) -> StashResult<&'a Path> {
    local_file.ok_or_else(|| {
        StashError::Internal(format!("{} needs a local archive file", request.name()))
    })
}

fn run(request: &Request, local_file: Option<&Path>, stop: &StopFlag) -> StashResult<Response> {
    match request.transfer() {
        Transfer::None => executor::execute(request, Stream::None, stop),
        Transfer::Download => {
            let path = transfer_file(request, local_file)?;
            let result = download(request, path, stop);
            if result.is_err() {
                discard(path);
            }
            result
        }
        Transfer::Upload => {
            let path = transfer_file(request, local_file)?;
            let file = File::open(path)
                .map_err(|e| StashError::io(format!("opening {}", path.display()), e))?;
            executor::execute(request, Stream::Source(&mut BufReader::new(file)), stop)
        }
    }
}

/// Stream a request's archive into a new file at `path`
fn download(request: &Request, path: &Path, stop: &StopFlag) -> StashResult<Response> {
    stop.check()?;
    let file = File::create(path)
        .map_err(|e| StashError::io(format!("creating {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    let response = executor::execute(request, Stream::Sink(&mut writer), stop)?;
    let file = writer
        .into_inner()
        .map_err(|e| StashError::io(format!("writing {}", path.display()), e.into_error()))?;
    file.sync_all()
        .map_err(|e| StashError::io(format!("syncing {}", path.display()), e))?;

    // The caller may already have cleaned up and gone
    stop.check()?;
    Ok(response)
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed unfinished {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove {}: {}", path.display(), e),
    }
}

#[async_trait]
impl ExecutionChannel for LocalChannel {
    fn channel_name(&self) -> &'static str {
        "local"
    }

    async fn dispatch(&self, request: Request, local_file: Option<&Path>) -> StashResult<Response> {
        let local_file: Option<PathBuf> = local_file.map(Path::to_path_buf);
        let stop = StopFlag::default();
        let _abandon = StopOnDrop(stop.clone());

        tokio::task::spawn_blocking(move || run(&request, local_file.as_deref(), &stop))
            .await
            .map_err(|e| StashError::Internal(format!("executor task failed: {}", e)))?
    }

    async fn close(&self) -> StashResult<()> {
        Ok(())
    }
}
