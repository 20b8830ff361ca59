//! Work performed on the execution node
//!
//! Everything here is blocking filesystem code. It runs on the tokio
//! blocking pool for the local channel, or inside `buildstash agent` when
//! the execution node is another process or host.

pub mod archiver;
pub mod probe;

pub use archiver::{extract_archive, write_archive};
pub use probe::measure;

use crate::error::{StashError, StashResult};
use crate::remote::{Request, Response};
use std::fs;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Tells running executor work that nobody waits for its result any more
///
/// Work checks the flag between tree entries and on every read of file or
/// archive bytes, then fails.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> StashResult<()> {
        if self.is_stopped() {
            Err(StashError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Reader that fails once its flag is stopped
pub(crate) struct Stoppable<R> {
    inner: R,
    stop: StopFlag,
}

impl<R> Stoppable<R> {
    pub(crate) fn new(inner: R, stop: &StopFlag) -> Self {
        Self {
            inner,
            stop: stop.clone(),
        }
    }
}

impl<R: Read> Read for Stoppable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.stop.is_stopped() {
            return Err(io::Error::other("request abandoned"));
        }
        self.inner.read(buf)
    }
}

/// Byte stream attached to a request
pub enum Stream<'a> {
    None,
    /// Archive bytes flow out of the executor
    Sink(&'a mut dyn Write),
    /// Archive bytes flow into the executor
    Source(&'a mut dyn Read),
}

/// Carry out one request on this node
pub fn execute(request: &Request, stream: Stream<'_>, stop: &StopFlag) -> StashResult<Response> {
    stop.check()?;
    debug!("Executing {}", request.name());
    match (request, stream) {
        (Request::MeasureSize { root, filter }, Stream::None) => Ok(Response::Size {
            bytes: measure(root, filter, stop)?,
        }),
        (Request::EnsureDir { path }, Stream::None) => {
            fs::create_dir_all(path)
                .map_err(|e| StashError::io(format!("creating {}", path.display()), e))?;
            Ok(Response::Done)
        }
        (
            Request::CreateArchive {
                source,
                filter,
                compression,
            },
            Stream::Sink(sink),
        ) => {
            write_archive(source, filter, *compression, sink, stop)?;
            Ok(Response::Done)
        }
        (
            Request::ExtractArchive {
                target,
                compression,
            },
            Stream::Source(source),
        ) => {
            extract_archive(*compression, source, target, stop)?;
            Ok(Response::Done)
        }
        (Request::Shutdown, Stream::None) => Ok(Response::Done),
        (request, _) => Err(StashError::Protocol(format!(
            "{} received the wrong kind of byte stream",
            request.name()
        ))),
    }
}
