//! Boundary between the control node and the execution node
//!
//! The control node owns the store and decides what to do. The execution
//! node owns the build workspace and only answers [`Request`]s. Each remote
//! call is one awaited [`ExecutionContext::invoke`], raced against the
//! context's [`Interrupt`].

pub mod agent;
pub mod interrupt;
pub mod local;
pub mod message;
pub mod process;
pub mod protocol;

pub use interrupt::{interrupt_pair, Interrupt, InterruptHandle};
pub use local::LocalChannel;
pub use message::{Request, Response, Transfer};
pub use process::ProcessChannel;

use crate::config::schema::{ExecutorConfig, ExecutorKind};
use crate::error::{StashError, StashResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport that carries requests to an execution node
#[async_trait]
pub trait ExecutionChannel: Send + Sync {
    /// Channel name for logs
    fn channel_name(&self) -> &'static str;

    /// Send one request and wait for its response
    ///
    /// `local_file` is the control-side blob for requests that move archive
    /// bytes: it is created for downloads and read for uploads.
    async fn dispatch(&self, request: Request, local_file: Option<&Path>) -> StashResult<Response>;

    /// Release the execution node
    async fn close(&self) -> StashResult<()>;
}

/// Create the channel selected by the executor configuration
pub fn create_channel(config: &ExecutorConfig) -> StashResult<Arc<dyn ExecutionChannel>> {
    match config.kind {
        ExecutorKind::Local => Ok(Arc::new(LocalChannel::new())),
        ExecutorKind::Process => Ok(Arc::new(ProcessChannel::new(config.command.clone())?)),
    }
}

/// Everything a cache operation needs to reach the execution node
#[derive(Clone)]
pub struct ExecutionContext {
    channel: Arc<dyn ExecutionChannel>,
    workspace: PathBuf,
    env: BTreeMap<String, String>,
    interrupt: Interrupt,
}

impl ExecutionContext {
    /// Create a context for `workspace` on the channel's execution node
    pub fn new(channel: Arc<dyn ExecutionChannel>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            workspace: workspace.into(),
            env: BTreeMap::new(),
            interrupt: Interrupt::never(),
        }
    }

    /// Set the build environment used for path expansion
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.channel_name()
    }

    /// Resolve a path on the execution node against the workspace
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    /// Run one request on the execution node
    ///
    /// A `Failed` response becomes [`StashError::Remote`]. If the interrupt
    /// fires first the call is abandoned and [`StashError::Interrupted`] is
    /// returned; effects already applied on the execution node stay.
    pub async fn invoke(&self, request: Request, local_file: Option<&Path>) -> StashResult<Response> {
        if self.interrupt.is_triggered() {
            return Err(StashError::Interrupted);
        }

        let name = request.name();
        debug!("Invoking {} on {} channel", name, self.channel.channel_name());

        tokio::select! {
            biased;
            _ = self.interrupt.triggered() => {
                warn!("Abandoned {} on {} channel", name, self.channel.channel_name());
                Err(StashError::Interrupted)
            }
            response = self.channel.dispatch(request, local_file) => response?.into_result(),
        }
    }

    /// Release the execution node
    pub async fn close(&self) -> StashResult<()> {
        self.channel.close().await
    }
}
