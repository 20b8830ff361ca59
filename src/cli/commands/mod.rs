//! CLI command implementations

pub mod agent;
pub mod config;
pub mod key;
pub mod save;
pub mod seed;
pub mod size;

pub use agent::execute as agent;
pub use config::execute as config;
pub use key::execute as key;
pub use save::execute as save;
pub use seed::execute as seed;
pub use size::execute as size;

use crate::cache::{create_cache, Cache};
use crate::cli::args::WorkspaceArgs;
use crate::config::Config;
use crate::error::{StashError, StashResult};
use crate::remote::{create_channel, ExecutionContext, Interrupt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Build every `[[caches]]` entry
pub(crate) fn configured_caches(config: &Config) -> StashResult<Vec<Box<dyn Cache>>> {
    if config.caches.is_empty() {
        return Err(StashError::NoCachesConfigured);
    }
    config.caches.iter().map(create_cache).collect()
}

/// Build environment: this process's variables plus `--env` overrides
pub(crate) fn build_env(args: &WorkspaceArgs) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    env.extend(args.env.iter().cloned());
    env
}

fn workspace(args: &WorkspaceArgs, config: &Config) -> StashResult<PathBuf> {
    if let Some(dir) = args.workspace.clone().or_else(|| config.executor.workspace.clone()) {
        return Ok(dir);
    }
    std::env::current_dir().map_err(|e| StashError::io("getting current directory", e))
}

/// Connect to the configured executor
pub(crate) fn execution_context(
    config: &Config,
    args: &WorkspaceArgs,
    env: BTreeMap<String, String>,
    interrupt: Interrupt,
) -> StashResult<ExecutionContext> {
    let workspace = workspace(args, config)?;
    let channel = create_channel(&config.executor)?;
    debug!(
        "Workspace {} on {} executor",
        workspace.display(),
        channel.channel_name()
    );
    Ok(ExecutionContext::new(channel, workspace)
        .with_env(env)
        .with_interrupt(interrupt))
}

/// Close the executor, keeping the first error
pub(crate) async fn finish(ctx: &ExecutionContext, result: StashResult<()>) -> StashResult<()> {
    let closed = ctx.close().await;
    result.and(closed)
}
