//! Unix socket transport.
//!
//! Frame layout: `[len: u32 BE][kind: u8][payload]`, where `len` counts the
//! kind byte plus payload. Text frames carry one JSON control frame; binary
//! frames carry raw terminal output.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Connector, EventSender, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::TransportMessage;

// ── Frame kinds (must match the remote side) ─────────────────────────

pub const FRAME_TEXT: u8 = 0x00;
pub const FRAME_BINARY: u8 = 0x01;

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const READ_BUFFER_SIZE: usize = 65536;

/// Fails for messages the peer would reject as over [`MAX_FRAME_LEN`].
pub fn encode_frame(message: &TransportMessage) -> io::Result<Vec<u8>> {
    let (kind, payload) = match message {
        TransportMessage::Text(text) => (FRAME_TEXT, text.as_bytes()),
        TransportMessage::Binary(bytes) => (FRAME_BINARY, bytes.as_ref()),
    };
    let len = payload
        .len()
        .checked_add(1)
        .filter(|len| *len <= MAX_FRAME_LEN)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit", payload.len().saturating_add(1)),
            )
        })?;
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.push(kind);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Reassembles frames from arbitrarily split reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Next complete frame as `(kind, payload)`. Empty frames are skipped.
    pub fn next_frame(&mut self) -> io::Result<Option<(u8, Vec<u8>)>> {
        loop {
            if self.pending.len() < 4 {
                return Ok(None);
            }
            let msg_len = u32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            if msg_len > MAX_FRAME_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {msg_len} bytes exceeds limit"),
                ));
            }
            if self.pending.len() < 4 + msg_len {
                return Ok(None);
            }

            let mut frame: Vec<u8> = self.pending.drain(..4 + msg_len).skip(4).collect();
            if frame.is_empty() {
                continue;
            }
            let kind = frame.remove(0);
            return Ok(Some((kind, frame)));
        }
    }
}

/// Converts a decoded frame into a message; unknown kinds and invalid text
/// are dropped.
fn frame_to_message(kind: u8, payload: Vec<u8>) -> Option<TransportMessage> {
    match kind {
        FRAME_TEXT => match String::from_utf8(payload) {
            Ok(text) => Some(TransportMessage::Text(text)),
            Err(err) => {
                warn!(error = %err, "dropping text frame with invalid UTF-8");
                None
            }
        },
        FRAME_BINARY => Some(TransportMessage::Binary(Bytes::from(payload))),
        other => {
            warn!(kind = other, "dropping frame of unknown kind");
            None
        }
    }
}

/// Connects `target` to `<socket_dir>/<target>.sock`.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    socket_dir: PathBuf,
}

impl UnixConnector {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    pub fn socket_path(&self, target: &str) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", target))
    }
}

impl Connector for UnixConnector {
    fn connect(&self, target: &str, events: EventSender) -> Box<dyn Transport> {
        let path = self.socket_path(target);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(path, events, outbound_rx));
        Box::new(UnixTransport {
            outbound: Some(outbound_tx),
            task,
        })
    }
}

struct UnixTransport {
    outbound: Option<mpsc::UnboundedSender<TransportMessage>>,
    task: JoinHandle<()>,
}

impl Transport for UnixTransport {
    fn send(&mut self, message: TransportMessage) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound.send(message).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.outbound = None;
        self.task.abort();
    }
}

impl Drop for UnixTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    path: PathBuf,
    events: EventSender,
    outbound: mpsc::UnboundedReceiver<TransportMessage>,
) {
    let stream = match UnixStream::connect(&path).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = events.send(TransportEvent::Error(format!(
                "failed to connect to {}: {}",
                path.display(),
                err
            )));
            return;
        }
    };
    debug!(path = %path.display(), "unix transport connected");
    let _ = events.send(TransportEvent::Open);

    let (reader, writer) = stream.into_split();
    tokio::select! {
        _ = read_loop(reader, &events) => {}
        result = write_loop(writer, outbound) => {
            if let Err(err) = result {
                let _ = events.send(TransportEvent::Error(format!("write failed: {err}")));
            }
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, events: &EventSender) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            Ok(n) => n,
            Err(err) => {
                let _ = events.send(TransportEvent::Error(format!("read failed: {err}")));
                return;
            }
        };
        decoder.push(&buf[..n]);
        loop {
            match decoder.next_frame() {
                Ok(Some((kind, payload))) => {
                    if let Some(message) = frame_to_message(kind, payload) {
                        if events.send(TransportEvent::Message(message)).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = events.send(TransportEvent::Error(err.to_string()));
                    return;
                }
            }
        }
    }
}

/// Ends cleanly once the transport handle is closed or dropped.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<TransportMessage>,
) -> io::Result<()> {
    while let Some(message) = outbound.recv().await {
        let frame = match encode_frame(&message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping outbound message");
                continue;
            }
        };
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await
}

/// Whether a socket for `target` currently exists in `socket_dir`.
pub fn socket_exists(socket_dir: &Path, target: &str) -> bool {
    UnixConnector::new(socket_dir).socket_path(target).exists()
}
