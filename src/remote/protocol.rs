//! Framed wire protocol for the child-process channel
//!
//! Wire format (integers are big-endian):
//!
//! ```text
//! +--------+---------+------------------+
//! | type   | length  | payload          |
//! | 1 byte | 4 bytes | `length` bytes   |
//! +--------+---------+------------------+
//! ```
//!
//! Frame types:
//! - 0x01 REQUEST: JSON [`Request`], control to agent
//! - 0x02 RESPONSE: JSON [`Response`], agent to control
//! - 0x03 DATA: raw archive bytes, either way
//! - 0x04 END: archive stream complete, either way
//! - 0x05 ABORT: control side could not finish an upload (UTF-8 reason)
//!
//! Each reader only accepts the frame types its peer may send.

use super::message::{Request, Response};
use crate::error::{StashError, StashResult};
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame type identifiers
pub mod frame {
    pub const REQUEST: u8 = 0x01;
    pub const RESPONSE: u8 = 0x02;
    pub const DATA: u8 = 0x03;
    pub const END: u8 = 0x04;
    pub const ABORT: u8 = 0x05;
}

/// Largest payload accepted from the wire
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Payload size of outgoing DATA frames
pub const DATA_CHUNK: usize = 64 * 1024;

fn frame_name(kind: u8) -> &'static str {
    match kind {
        frame::REQUEST => "REQUEST",
        frame::RESPONSE => "RESPONSE",
        frame::DATA => "DATA",
        frame::END => "END",
        frame::ABORT => "ABORT",
        _ => "unknown",
    }
}

fn check_len(len: u32) -> io::Result<usize> {
    let len = len as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN),
        ));
    }
    Ok(len)
}

fn header(kind: u8, payload: &[u8]) -> io::Result<[u8; 5]> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame payload too large"))?;
    let mut buf = [0u8; 5];
    buf[0] = kind;
    buf[1..].copy_from_slice(&len.to_be_bytes());
    Ok(buf)
}

/// Write one frame
pub fn write_frame<W: Write + ?Sized>(w: &mut W, kind: u8, payload: &[u8]) -> io::Result<()> {
    w.write_all(&header(kind, payload)?)?;
    w.write_all(payload)
}

/// Read one frame, `None` on a clean end of stream before the header
pub fn read_frame<R: Read + ?Sized>(r: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut kind = [0u8; 1];
    match r.read_exact(&mut kind) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = check_len(u32::from_be_bytes(len_buf))?;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(Some((kind[0], payload)))
}

/// Async variant of [`write_frame`]
pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    w: &mut W,
    kind: u8,
    payload: &[u8],
) -> io::Result<()> {
    w.write_all(&header(kind, payload)?).await?;
    w.write_all(payload).await
}

/// Async variant of [`read_frame`]; end of stream is an error here
pub async fn read_frame_async<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<(u8, Vec<u8>)> {
    let kind = r.read_u8().await?;
    let len = check_len(r.read_u32().await?)?;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok((kind, payload))
}

/// Frames the agent accepts
#[derive(Debug)]
pub enum AgentFrame {
    Request(Request),
    Data(Vec<u8>),
    End,
    Abort(String),
}

impl AgentFrame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request(_) => "REQUEST",
            Self::Data(_) => "DATA",
            Self::End => "END",
            Self::Abort(_) => "ABORT",
        }
    }
}

/// Frames the control side accepts
#[derive(Debug)]
pub enum ControlFrame {
    Response(Response),
    Data(Vec<u8>),
    End,
}

/// Read the next frame on the agent side
pub fn read_agent_frame<R: Read + ?Sized>(r: &mut R) -> StashResult<Option<AgentFrame>> {
    let Some((kind, payload)) =
        read_frame(r).map_err(|e| StashError::io("reading from control side", e))?
    else {
        return Ok(None);
    };

    let frame = match kind {
        frame::REQUEST => AgentFrame::Request(serde_json::from_slice(&payload)?),
        frame::DATA => AgentFrame::Data(payload),
        frame::END => AgentFrame::End,
        frame::ABORT => AgentFrame::Abort(String::from_utf8_lossy(&payload).into_owned()),
        other => {
            return Err(StashError::Protocol(format!(
                "agent does not accept {} frames (0x{:02x})",
                frame_name(other),
                other
            )))
        }
    };
    Ok(Some(frame))
}

/// Read the next frame on the control side
pub async fn read_control_frame<R: AsyncRead + Unpin>(r: &mut R) -> StashResult<ControlFrame> {
    let (kind, payload) = read_frame_async(r)
        .await
        .map_err(|e| StashError::io("reading from agent", e))?;

    match kind {
        frame::RESPONSE => Ok(ControlFrame::Response(serde_json::from_slice(&payload)?)),
        frame::DATA => Ok(ControlFrame::Data(payload)),
        frame::END => Ok(ControlFrame::End),
        other => Err(StashError::Protocol(format!(
            "control side does not accept {} frames (0x{:02x})",
            frame_name(other),
            other
        ))),
    }
}

/// Send a response from the agent
pub fn write_response<W: Write + ?Sized>(w: &mut W, response: &Response) -> StashResult<()> {
    let payload = serde_json::to_vec(response)?;
    write_frame(w, frame::RESPONSE, &payload)
        .and_then(|()| w.flush())
        .map_err(|e| StashError::io("writing response", e))
}

/// Send a request from the control side
pub async fn write_request<W: AsyncWrite + Unpin>(w: &mut W, request: &Request) -> StashResult<()> {
    let payload = serde_json::to_vec(request)?;
    write_frame_async(w, frame::REQUEST, &payload)
        .await
        .map_err(|e| StashError::io("writing request", e))?;
    w.flush()
        .await
        .map_err(|e| StashError::io("writing request", e))
}

/// Writer that chops a byte stream into DATA frames
pub struct FrameSink<W: Write> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> FrameSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(DATA_CHUNK),
        }
    }

    fn emit(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            write_frame(&mut self.inner, frame::DATA, &self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Send buffered bytes and the END marker
    pub fn finish(mut self) -> io::Result<W> {
        self.emit()?;
        write_frame(&mut self.inner, frame::END, &[])?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for FrameSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = DATA_CHUNK - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == DATA_CHUNK {
            self.emit()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit()?;
        self.inner.flush()
    }
}

/// How an incoming byte stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceState {
    Open,
    Ended,
    Aborted(String),
    Broken(String),
}

/// Reader over incoming DATA frames, ending at END or ABORT
pub struct FrameSource<R: Read> {
    inner: R,
    chunk: Vec<u8>,
    pos: usize,
    state: SourceState,
}

impl<R: Read> FrameSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            chunk: Vec::new(),
            pos: 0,
            state: SourceState::Open,
        }
    }

    fn next_frame(&mut self) {
        match read_agent_frame(&mut self.inner) {
            Ok(Some(AgentFrame::Data(bytes))) => {
                self.chunk = bytes;
                self.pos = 0;
            }
            Ok(Some(AgentFrame::End)) => self.state = SourceState::Ended,
            Ok(Some(AgentFrame::Abort(reason))) => self.state = SourceState::Aborted(reason),
            Ok(Some(other)) => {
                self.state =
                    SourceState::Broken(format!("{} frame inside an archive stream", other.name()))
            }
            Ok(None) => {
                self.state = SourceState::Broken("channel closed inside an archive stream".into())
            }
            Err(e) => self.state = SourceState::Broken(e.to_string()),
        }
    }

    /// Consume the rest of the stream
    ///
    /// Returns the abort reason if the sender gave up. A broken stream is a
    /// protocol error since the channel can no longer be used.
    pub fn drain(&mut self) -> StashResult<Option<String>> {
        while self.state == SourceState::Open {
            self.next_frame();
        }
        match &self.state {
            SourceState::Ended => Ok(None),
            SourceState::Aborted(reason) => Ok(Some(reason.clone())),
            SourceState::Broken(reason) => Err(StashError::Protocol(reason.clone())),
            SourceState::Open => Err(StashError::Internal("archive stream still open".into())),
        }
    }
}

impl<R: Read> Read for FrameSource<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.chunk.len() {
                let n = (self.chunk.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match &self.state {
                SourceState::Open => self.next_frame(),
                SourceState::Ended => return Ok(0),
                SourceState::Aborted(reason) => {
                    return Err(io::Error::other(format!("upload aborted: {}", reason)))
                }
                SourceState::Broken(reason) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, reason.clone()))
                }
            }
        }
    }
}
