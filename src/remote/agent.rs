//! Execution-side request loop
//!
//! Runs inside `buildstash agent`, reading frames from stdin and answering
//! on stdout. Logs must go to stderr.

use super::message::{Request, Response, Transfer};
use super::protocol::{self, AgentFrame, FrameSink, FrameSource};
use crate::error::{StashError, StashResult};
use crate::executor::{self, StopFlag, Stream};
use std::error::Error as _;
use std::io::{Read, Write};
use tracing::{debug, info, warn};

/// Serve requests until `Shutdown` or the control side closes the stream
pub fn serve<R: Read, W: Write>(mut reader: R, mut writer: W) -> StashResult<()> {
    info!("Agent ready");

    loop {
        let request = match protocol::read_agent_frame(&mut reader)? {
            Some(AgentFrame::Request(request)) => request,
            Some(other) => {
                return Err(StashError::Protocol(format!(
                    "expected a request, got a {} frame",
                    other.name()
                )))
            }
            None => {
                info!("Control side closed the channel");
                break;
            }
        };

        debug!("Received {}", request.name());
        let response = handle(&request, &mut reader, &mut writer)?;
        if let Response::Failed { message } = &response {
            warn!("{} failed: {}", request.name(), message);
        }
        protocol::write_response(&mut writer, &response)?;

        if request == Request::Shutdown {
            info!("Shutting down");
            break;
        }
    }

    Ok(())
}

/// Run one request; only transport failures are returned as errors
fn handle<R: Read, W: Write>(
    request: &Request,
    reader: &mut R,
    writer: &mut W,
) -> StashResult<Response> {
    // The agent process is killed when the control side gives up
    let never = StopFlag::default();
    let outcome = match request.transfer() {
        Transfer::None => executor::execute(request, Stream::None, &never),
        Transfer::Download => {
            let mut sink = FrameSink::new(&mut *writer);
            let outcome = executor::execute(request, Stream::Sink(&mut sink), &never);
            sink.finish()
                .map_err(|e| StashError::io("writing archive stream", e))?;
            outcome
        }
        Transfer::Upload => {
            let mut source = FrameSource::new(&mut *reader);
            let outcome = executor::execute(request, Stream::Source(&mut source), &never);
            if let Some(reason) = source.drain()? {
                return Ok(Response::Failed {
                    message: format!("upload aborted by control side: {}", reason),
                });
            }
            outcome
        }
    };

    Ok(match outcome {
        Ok(response) => response,
        Err(e) => Response::Failed {
            message: error_chain(&e),
        },
    })
}

/// Render an error with all of its sources
fn error_chain(err: &StashError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
