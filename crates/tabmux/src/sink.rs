//! The rendering side of a session.
//!
//! A sink consumes raw output bytes and exposes its rendered buffer line by
//! line. Interpreting escape sequences is entirely the sink's business; the
//! session only moves bytes and reads lines back for scrollback queries.

use std::collections::VecDeque;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::SinkError;
use crate::resize::Geometry;

/// Resolves once the sink has rendered the bytes of one `write` call.
///
/// A dropped sender counts as completion.
pub type WriteCompletion = oneshot::Receiver<()>;

pub trait Sink: Send + 'static {
    fn write(&mut self, bytes: Bytes) -> WriteCompletion;

    /// Number of rendered lines in the active buffer (primary or alternate).
    fn line_count(&self) -> Result<usize, SinkError>;

    /// Text of line `index` with trailing blanks removed.
    fn line(&self, index: usize) -> Result<Option<String>, SinkError>;

    fn select_all(&mut self) -> Result<(), SinkError>;
    fn selection(&self) -> Result<Option<String>, SinkError>;
    fn clear_selection(&mut self);

    /// Geometry currently in effect.
    fn geometry(&self) -> Geometry;

    /// Geometry that would fit the hosting surface, if it can be measured.
    fn propose_geometry(&self) -> Option<Geometry>;

    fn resize(&mut self, geometry: Geometry);

    fn set_theme(&mut self, _theme: &Value) {}

    /// Write a local status line that does not count against flow control.
    fn write_status(&mut self, text: &str) {
        drop(self.write(Bytes::from(format!("{text}\r\n"))));
    }
}

/// A completion that is already resolved.
pub fn completed() -> WriteCompletion {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(());
    rx
}

type GeometrySource = Box<dyn Fn() -> Option<Geometry> + Send>;

type MirrorWrite = (Bytes, oneshot::Sender<()>);
type MirrorSender = mpsc::UnboundedSender<MirrorWrite>;

/// Copies writes to `writer` in order, completing each once flushed. Stops at
/// the first error.
async fn run_mirror<W>(mut writer: W, mut writes: mpsc::UnboundedReceiver<MirrorWrite>)
where
    W: AsyncWrite + Unpin,
{
    while let Some((bytes, done)) = writes.recv().await {
        if let Err(err) = writer.write_all(&bytes).await {
            warn!(error = %err, "sink mirror write failed, disabling mirror");
            return;
        }
        if let Err(err) = writer.flush().await {
            warn!(error = %err, "sink mirror flush failed, disabling mirror");
            return;
        }
        let _ = done.send(());
    }
}

/// Headless sink that keeps output as plain text lines.
///
/// Bytes are split on `\n` and a trailing `\r` is dropped; no other control
/// characters are interpreted. The row after the last newline counts as a
/// line, so `line_count` is never zero.
pub struct LineSink {
    lines: VecDeque<String>,
    current: String,
    /// Incomplete UTF-8 sequence carried over from the previous write.
    carry: Vec<u8>,
    max_lines: usize,
    geometry: Geometry,
    geometry_source: Option<GeometrySource>,
    selection: Option<String>,
    theme: Option<Value>,
    mirror: Option<MirrorSender>,
}

impl LineSink {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            current: String::new(),
            carry: Vec::new(),
            max_lines: max_lines.max(1),
            geometry: Geometry::default(),
            geometry_source: None,
            selection: None,
            theme: None,
            mirror: None,
        }
    }

    /// Copy every raw write to `writer` on a separate task. A write then
    /// completes only once the mirror has flushed it, so a slow writer
    /// backs up flow control instead of blocking the session. Must be called
    /// inside a tokio runtime.
    pub fn with_mirror<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_mirror(writer, rx));
        self.mirror = Some(tx);
        self
    }

    /// Measure the hosting surface with `source` when a resize is proposed.
    pub fn with_geometry_source(
        mut self,
        source: impl Fn() -> Option<Geometry> + Send + 'static,
    ) -> Self {
        self.geometry_source = Some(Box::new(source));
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn theme(&self) -> Option<&Value> {
        self.theme.as_ref()
    }

    /// All retained lines, including the unterminated last row.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.current);
        out
    }

    fn ingest(&mut self, data: &[u8]) {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(data);

        let valid = match std::str::from_utf8(&buf) {
            Ok(_) => buf.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => buf.len(),
        };
        self.carry = buf.split_off(valid);
        let text = String::from_utf8_lossy(&buf);

        for ch in text.chars() {
            if ch == '\n' {
                let mut line = std::mem::take(&mut self.current);
                if line.ends_with('\r') {
                    line.pop();
                }
                self.push_line(line);
            } else {
                self.current.push(ch);
            }
        }
    }

    fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() + 1 > self.max_lines {
            self.lines.pop_front();
        }
    }
}

impl Sink for LineSink {
    fn write(&mut self, bytes: Bytes) -> WriteCompletion {
        self.ingest(&bytes);
        let Some(mirror) = self.mirror.as_ref() else {
            return completed();
        };
        let (done, completion) = oneshot::channel();
        if mirror.send((bytes, done)).is_err() {
            self.mirror = None;
            return completed();
        }
        completion
    }

    fn line_count(&self) -> Result<usize, SinkError> {
        Ok(self.lines.len() + 1)
    }

    fn line(&self, index: usize) -> Result<Option<String>, SinkError> {
        let line = if index < self.lines.len() {
            self.lines.get(index)
        } else if index == self.lines.len() {
            Some(&self.current)
        } else {
            None
        };
        Ok(line.map(|l| l.trim_end().to_string()))
    }

    fn select_all(&mut self) -> Result<(), SinkError> {
        self.selection = Some(self.text());
        Ok(())
    }

    fn selection(&self) -> Result<Option<String>, SinkError> {
        Ok(self.selection.clone())
    }

    fn clear_selection(&mut self) {
        self.selection = None;
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn propose_geometry(&self) -> Option<Geometry> {
        self.geometry_source.as_ref().and_then(|source| source())
    }

    fn resize(&mut self, geometry: Geometry) {
        self.geometry = geometry;
    }

    fn set_theme(&mut self, theme: &Value) {
        self.theme = Some(theme.clone());
    }
}
