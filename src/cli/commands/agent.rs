//! Agent command - serve executor requests over stdio

use crate::error::{StashError, StashResult};
use crate::remote::agent;
use std::io::{BufReader, BufWriter};

/// Execute the agent command
///
/// stdout carries protocol frames, so nothing else may print to it.
pub async fn execute() -> StashResult<()> {
    tokio::task::spawn_blocking(|| {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        agent::serve(BufReader::new(stdin.lock()), BufWriter::new(stdout.lock()))
    })
    .await
    .map_err(|e| StashError::Internal(format!("agent task failed: {}", e)))?
}
