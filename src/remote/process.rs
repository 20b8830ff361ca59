//! Execution channel backed by a child `buildstash agent` process
//!
//! The command may start the agent locally, or on another host through
//! `ssh` or a container exec. Frames travel over its stdin and stdout.

use super::local::transfer_file;
use super::message::{Request, Response, Transfer};
use super::protocol::{self, frame, ControlFrame, DATA_CHUNK};
use super::ExecutionChannel;
use crate::error::{StashError, StashResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Running agent and its pipes
struct Agent {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

#[derive(Default)]
struct AgentSlot {
    agent: Option<Agent>,
    /// Set while a request is on the wire; left set if the call was dropped
    in_flight: bool,
}

/// Local file opened for a transfer before the request is sent
enum LocalFile {
    None,
    Download(File),
    Upload(File),
}

/// Channel that talks to an agent process over its stdio
pub struct ProcessChannel {
    command: Vec<String>,
    slot: Mutex<AgentSlot>,
}

impl ProcessChannel {
    /// Create a channel that starts `command` on first use
    pub fn new(command: Vec<String>) -> StashResult<Self> {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(StashError::ExecutorInvalid(
                "process executor needs a command".to_string(),
            ));
        }
        Ok(Self {
            command,
            slot: Mutex::new(AgentSlot::default()),
        })
    }

    fn spawn(&self) -> StashResult<Agent> {
        let spawn_error = |source| StashError::AgentSpawn {
            command: self.command.join(" "),
            source,
        };

        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StashError::Internal("agent stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StashError::Internal("agent stdout not captured".to_string()))?;

        info!("Started agent: {}", self.command.join(" "));
        Ok(Agent {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }
}

async fn open_local(request: &Request, local_file: Option<&Path>) -> StashResult<LocalFile> {
    Ok(match request.transfer() {
        Transfer::None => LocalFile::None,
        Transfer::Download => {
            let path = transfer_file(request, local_file)?;
            LocalFile::Download(
                File::create(path)
                    .await
                    .map_err(|e| StashError::io(format!("creating {}", path.display()), e))?,
            )
        }
        Transfer::Upload => {
            let path = transfer_file(request, local_file)?;
            LocalFile::Upload(
                File::open(path)
                    .await
                    .map_err(|e| StashError::io(format!("opening {}", path.display()), e))?,
            )
        }
    })
}

async fn read_response(agent: &mut Agent) -> StashResult<Response> {
    match protocol::read_control_frame(&mut agent.stdout).await? {
        ControlFrame::Response(response) => Ok(response),
        ControlFrame::Data(_) | ControlFrame::End => Err(StashError::Protocol(
            "agent sent archive data where a response was expected".to_string(),
        )),
    }
}

/// Run one request over the pipes
///
/// The outer error means the pipes are out of sync and the agent must be
/// discarded. The inner error is a local file failure after which the
/// protocol was completed normally.
async fn exchange(
    agent: &mut Agent,
    request: &Request,
    local: LocalFile,
) -> StashResult<StashResult<Response>> {
    protocol::write_request(&mut agent.stdin, request).await?;

    let local_error = match local {
        LocalFile::None => None,
        LocalFile::Download(file) => receive_archive(agent, file).await?,
        LocalFile::Upload(file) => send_archive(agent, file).await?,
    };

    let response = read_response(agent).await?;
    Ok(match local_error {
        Some(e) => Err(e),
        None => Ok(response),
    })
}

/// Copy DATA frames into `file` until END
async fn receive_archive(agent: &mut Agent, file: File) -> StashResult<Option<StashError>> {
    let mut file = BufWriter::new(file);
    let mut local_error = None;

    loop {
        match protocol::read_control_frame(&mut agent.stdout).await? {
            ControlFrame::Data(bytes) => {
                if local_error.is_none() {
                    if let Err(e) = file.write_all(&bytes).await {
                        local_error = Some(StashError::io("writing archive", e));
                    }
                }
            }
            ControlFrame::End => break,
            ControlFrame::Response(_) => {
                return Err(StashError::Protocol(
                    "agent responded before ending the archive stream".to_string(),
                ))
            }
        }
    }

    if local_error.is_none() {
        if let Err(e) = file.flush().await {
            local_error = Some(StashError::io("writing archive", e));
        } else if let Err(e) = file.get_mut().sync_all().await {
            local_error = Some(StashError::io("syncing archive", e));
        }
    }
    Ok(local_error)
}

/// Stream `file` as DATA frames, ending with END or ABORT
async fn send_archive(agent: &mut Agent, mut file: File) -> StashResult<Option<StashError>> {
    let mut buf = vec![0u8; DATA_CHUNK];
    let io_err = |e| StashError::io("writing to agent", e);

    let local_error = loop {
        match file.read(&mut buf).await {
            Ok(0) => {
                protocol::write_frame_async(&mut agent.stdin, frame::END, &[])
                    .await
                    .map_err(io_err)?;
                break None;
            }
            Ok(n) => protocol::write_frame_async(&mut agent.stdin, frame::DATA, &buf[..n])
                .await
                .map_err(io_err)?,
            Err(e) => {
                let reason = e.to_string();
                protocol::write_frame_async(&mut agent.stdin, frame::ABORT, reason.as_bytes())
                    .await
                    .map_err(io_err)?;
                break Some(StashError::io("reading archive", e));
            }
        }
    };

    agent.stdin.flush().await.map_err(io_err)?;
    Ok(local_error)
}

#[async_trait]
impl ExecutionChannel for ProcessChannel {
    fn channel_name(&self) -> &'static str {
        "process"
    }

    async fn dispatch(&self, request: Request, local_file: Option<&Path>) -> StashResult<Response> {
        let mut slot = self.slot.lock().await;
        if slot.in_flight {
            return Err(StashError::ChannelAbandoned);
        }

        let local = open_local(&request, local_file).await?;

        let mut agent = match slot.agent.take() {
            Some(agent) => agent,
            None => self.spawn()?,
        };

        slot.in_flight = true;
        let result = exchange(&mut agent, &request, local).await;
        slot.in_flight = false;

        match result {
            Ok(outcome) => {
                slot.agent = Some(agent);
                outcome
            }
            Err(e) => {
                warn!("Dropping agent after {} failed: {}", request.name(), e);
                Err(e)
            }
        }
    }

    async fn close(&self) -> StashResult<()> {
        let mut slot = self.slot.lock().await;
        if slot.in_flight {
            // The dropped call owned the agent, and kill_on_drop stopped it
            debug!("Channel was abandoned mid-request, nothing to shut down");
            return Ok(());
        }
        let Some(mut agent) = slot.agent.take() else {
            return Ok(());
        };

        match exchange(&mut agent, &Request::Shutdown, LocalFile::None).await {
            Ok(_) => debug!("Agent acknowledged shutdown"),
            Err(e) => debug!("Agent shutdown failed: {}", e),
        }
        drop(agent.stdin);
        agent
            .child
            .wait()
            .await
            .map_err(|e| StashError::io("waiting for agent", e))?;
        Ok(())
    }
}
