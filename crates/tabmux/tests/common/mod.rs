//! Reusable harness for session and socket tests.
//!
//! Provides a sink whose render completions the test releases by hand, helpers
//! for driving the in-memory remote end, and a fake host that speaks the
//! Unix socket framing.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;

use tabmux::error::SinkError;
use tabmux::protocol::{self, ControlFrame, ScrollbackResponse, TransportMessage};
use tabmux::sink::{completed, WriteCompletion};
use tabmux::transport::memory::{MemoryConnector, RemoteEnd};
use tabmux::transport::unix::{encode_frame, FrameDecoder, UnixConnector, FRAME_BINARY, FRAME_TEXT};
use tabmux::{Config, Geometry, LineSink, Registry, Session, SessionState, Sink};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

// ── Probe sink ──────────────────────────────────────────────────────

struct ProbeState {
    lines: LineSink,
    hold: bool,
    held: VecDeque<oneshot::Sender<()>>,
    writes: Vec<Bytes>,
    statuses: Vec<String>,
    proposal: Option<Geometry>,
    resizes: Vec<Geometry>,
    theme: Option<Value>,
}

/// Test-side view of a [`ProbeSink`].
#[derive(Clone)]
pub struct Probe {
    state: Arc<Mutex<ProbeState>>,
}

impl Probe {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProbeState {
                lines: LineSink::new(1000),
                hold: false,
                held: VecDeque::new(),
                writes: Vec::new(),
                statuses: Vec::new(),
                proposal: None,
                resizes: Vec::new(),
                theme: None,
            })),
        }
    }

    pub fn sink(&self) -> ProbeSink {
        ProbeSink {
            probe: self.clone(),
        }
    }

    /// While holding, output writes stay unrendered until released.
    pub fn hold(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    /// Complete the `n` oldest held writes. Returns how many were released.
    pub fn release(&self, n: usize) -> usize {
        let mut state = self.state.lock();
        let mut released = 0;
        while released < n {
            let Some(tx) = state.held.pop_front() else {
                break;
            };
            let _ = tx.send(());
            released += 1;
        }
        released
    }

    pub fn release_all(&self) -> usize {
        self.release(usize::MAX)
    }

    pub fn held(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.state.lock().writes.clone()
    }

    pub fn written_bytes(&self) -> usize {
        self.state.lock().writes.iter().map(Bytes::len).sum()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.state.lock().statuses.clone()
    }

    pub fn set_proposal(&self, geometry: Option<Geometry>) {
        self.state.lock().proposal = geometry;
    }

    pub fn resizes(&self) -> Vec<Geometry> {
        self.state.lock().resizes.clone()
    }

    pub fn theme(&self) -> Option<Value> {
        self.state.lock().theme.clone()
    }

    pub fn text(&self) -> String {
        self.state.lock().lines.text()
    }
}

pub struct ProbeSink {
    probe: Probe,
}

impl Sink for ProbeSink {
    fn write(&mut self, bytes: Bytes) -> WriteCompletion {
        let mut state = self.probe.state.lock();
        drop(state.lines.write(bytes.clone()));
        state.writes.push(bytes);
        if !state.hold {
            return completed();
        }
        let (tx, rx) = oneshot::channel();
        state.held.push_back(tx);
        rx
    }

    fn line_count(&self) -> Result<usize, SinkError> {
        self.probe.state.lock().lines.line_count()
    }

    fn line(&self, index: usize) -> Result<Option<String>, SinkError> {
        self.probe.state.lock().lines.line(index)
    }

    fn select_all(&mut self) -> Result<(), SinkError> {
        self.probe.state.lock().lines.select_all()
    }

    fn selection(&self) -> Result<Option<String>, SinkError> {
        self.probe.state.lock().lines.selection()
    }

    fn clear_selection(&mut self) {
        self.probe.state.lock().lines.clear_selection();
    }

    fn geometry(&self) -> Geometry {
        self.probe.state.lock().lines.geometry()
    }

    fn propose_geometry(&self) -> Option<Geometry> {
        self.probe.state.lock().proposal
    }

    fn resize(&mut self, geometry: Geometry) {
        let mut state = self.probe.state.lock();
        state.lines.resize(geometry);
        state.resizes.push(geometry);
    }

    fn set_theme(&mut self, theme: &Value) {
        self.probe.state.lock().theme = Some(theme.clone());
    }

    fn write_status(&mut self, text: &str) {
        let mut state = self.probe.state.lock();
        state.lines.write_status(text);
        state.statuses.push(text.to_string());
    }
}

// ── Memory remote helpers ───────────────────────────────────────────

pub fn memory_registry(config: Config) -> (Registry, MemoryConnector) {
    let connector = MemoryConnector::new();
    let registry = Registry::new(Arc::new(connector.clone()), config).expect("valid config");
    (registry, connector)
}

/// Acquire `id` with a fresh probe sink and take its remote end.
pub fn attach(registry: &Registry, connector: &MemoryConnector, id: &str) -> (Session, RemoteEnd, Probe) {
    let probe = Probe::new();
    let sink = probe.sink();
    let session = registry.acquire_or_create(id, "host", move || sink);
    let remote = connector
        .take_remote()
        .expect("acquire should have connected");
    (session, remote, probe)
}

/// Open the remote end and consume the opening SetSessionId + Resize pair.
pub async fn open(session: &Session, remote: &mut RemoteEnd) -> Geometry {
    assert!(remote.open());
    settle(session, SessionState::Open).await;
    match next_control(remote).await {
        ControlFrame::TermSetSessionId { .. } => {}
        other => panic!("expected TermSetSessionId first, got {other:?}"),
    }
    match next_control(remote).await {
        ControlFrame::TermResize { rows, cols } => Geometry::new(rows, cols),
        other => panic!("expected TermResize second, got {other:?}"),
    }
}

pub async fn settle(session: &Session, want: SessionState) {
    let reached = tokio::time::timeout(STEP_TIMEOUT, session.wait_for(|s| s == want))
        .await
        .unwrap_or_else(|_| panic!("session never reached {want}, stuck at {}", session.state()));
    assert_eq!(reached, want);
}

/// Next control frame the session sent.
pub async fn next_control(remote: &mut RemoteEnd) -> ControlFrame {
    let message = tokio::time::timeout(STEP_TIMEOUT, remote.recv())
        .await
        .expect("timed out waiting for an outbound frame")
        .expect("session dropped its transport");
    match message {
        TransportMessage::Text(text) => {
            protocol::decode_control(&text).expect("session sent an undecodable frame")
        }
        TransportMessage::Binary(bytes) => panic!("session sent binary: {bytes:?}"),
    }
}

/// Ask for scrollback and return the response plus every frame sent before
/// it. Inbound events are handled in order, so everything injected earlier
/// has been processed once this returns.
pub async fn request_output(
    remote: &mut RemoteEnd,
    request_id: &str,
    lines: Option<i64>,
) -> (Vec<ControlFrame>, ScrollbackResponse) {
    assert!(remote.send_control(&ControlFrame::TermOutputRequest {
        request_id: request_id.to_string(),
        lines,
    }));
    let mut before = Vec::new();
    loop {
        match next_control(remote).await {
            ControlFrame::TermOutputResponse(response) if response.request_id == request_id => {
                return (before, response);
            }
            other => before.push(other),
        }
    }
}

/// Barrier: frames the session sent while handling everything injected so far.
pub async fn sync(remote: &mut RemoteEnd) -> Vec<ControlFrame> {
    request_output(remote, "sync", Some(1)).await.0
}

pub fn pauses(frames: &[ControlFrame]) -> Vec<bool> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ControlFrame::TermPause { pause } => Some(*pause),
            _ => None,
        })
        .collect()
}

pub fn resizes(frames: &[ControlFrame]) -> Vec<Geometry> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ControlFrame::TermResize { rows, cols } => Some(Geometry::new(*rows, *cols)),
            _ => None,
        })
        .collect()
}

// ── Fake socket host ────────────────────────────────────────────────

/// A remote host listening on `<tempdir>/<target>.sock`. Cleans up on drop.
pub struct FakeHost {
    pub dir: tempfile::TempDir,
    pub target: String,
    listener: UnixListener,
}

impl FakeHost {
    pub fn bind(target: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = UnixConnector::new(dir.path()).socket_path(target);
        let listener = UnixListener::bind(&path).expect("bind fake host socket");
        Self {
            dir,
            target: target.to_string(),
            listener,
        }
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.transport.socket_dir = Some(self.socket_dir());
        config
    }

    pub async fn accept(&self) -> HostConn {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for the session to connect")
            .expect("accept failed");
        HostConn {
            stream,
            decoder: FrameDecoder::new(),
        }
    }
}

/// One accepted session connection, seen from the host side.
pub struct HostConn {
    stream: UnixStream,
    decoder: FrameDecoder,
}

impl HostConn {
    pub async fn recv_control(&mut self) -> ControlFrame {
        loop {
            if let Some((kind, payload)) = self.decoder.next_frame().expect("corrupt stream") {
                assert_eq!(kind, FRAME_TEXT, "session only sends text frames");
                let text = String::from_utf8(payload).expect("utf-8 control frame");
                return protocol::decode_control(&text).expect("decodable control frame");
            }
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout(STEP_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a frame")
                .expect("read failed");
            assert!(n > 0, "session closed the connection");
            self.decoder.push(&buf[..n]);
        }
    }

    pub async fn send_control(&mut self, frame: &ControlFrame) {
        let message = protocol::encode(frame).expect("encode control frame");
        self.stream
            .write_all(&encode_frame(&message).expect("encode frame"))
            .await
            .expect("write control frame");
    }

    pub async fn send_output(&mut self, data: &[u8]) {
        let message = TransportMessage::Binary(Bytes::copy_from_slice(data));
        let frame = encode_frame(&message).expect("encode frame");
        debug_assert_eq!(frame[4], FRAME_BINARY);
        self.stream.write_all(&frame).await.expect("write output frame");
    }

    /// Read until the session closes its side.
    pub async fn expect_eof(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            let n = tokio::time::timeout(STEP_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for the session to hang up")
                .unwrap_or(0);
            if n == 0 {
                return;
            }
        }
    }
}
