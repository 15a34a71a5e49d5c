//! One logical terminal connection per UI tab.
//!
//! A session runs as its own task. The task exclusively owns the sink, the
//! transport, and the flow/resize state; the cloneable [`Session`] handle
//! only posts commands to it. Inbound transport events are handled strictly
//! in arrival order, and commands are drained first so a dispose wins over
//! any traffic still queued.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::flow::{FlowController, FlowSignal};
use crate::protocol::{
    self, ControlFrame, Inbound, ScrollbackResponse, StatusKind, StatusReport, TransportMessage,
};
use crate::resize::{Geometry, ResizeCoordinator};
use crate::scrollback::{self, ScrollbackRequest};
use crate::sink::Sink;
use crate::transport::{EventReceiver, Transport, TransportEvent};

pub type SessionId = String;

/// Called with `(session id, connected)` whenever connectivity changes.
pub type ConnectionListener = Arc<dyn Fn(&str, bool) + Send + Sync>;

// ── Status lines written into the sink ──────────────────────────────

const CLOSED_LINE: &str = "\r\n\x1b[31mConnection closed\x1b[m";
const ERROR_LINE: &str = "\r\n\x1b[31mConnection error\x1b[m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Connecting,
    Open,
    Paused,
    ClosedRemote,
    Failed,
    Disposed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (Init, Connecting) => true,
            (Connecting, Open | ClosedRemote | Failed) => true,
            (Open, Paused) | (Paused, Open) => true,
            (Open | Paused, ClosedRemote | Failed) => true,
            _ => false,
        }
    }

    /// Open or paused: the transport is up and accepts frames.
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Open | SessionState::Paused)
    }

    /// No further transport activity will happen.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SessionState::ClosedRemote | SessionState::Failed | SessionState::Disposed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "init",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Paused => "paused",
            SessionState::ClosedRemote => "closed",
            SessionState::Failed => "failed",
            SessionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Command {
    Input(String),
    Resize,
    SetActive(bool),
    Scrollback {
        request: ScrollbackRequest,
        reply: oneshot::Sender<ScrollbackResponse>,
    },
    Dispose,
}

struct Handle {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    activation_offsets: Vec<Duration>,
}

/// Handle to a running session. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Handle>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) struct SessionParts {
    pub id: SessionId,
    pub target: String,
    pub sink: Box<dyn Sink>,
    pub transport: Box<dyn Transport>,
    pub events: EventReceiver,
    pub config: Arc<Config>,
    pub listener: Option<ConnectionListener>,
}

impl Session {
    /// Spawn the session task. The transport must already be connecting.
    pub(crate) fn spawn(parts: SessionParts) -> Session {
        let (state_tx, state_rx) = watch::channel(SessionState::Init);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let mut task = SessionTask {
            id: parts.id.clone(),
            target: parts.target,
            flow: FlowController::from_config(&parts.config.flow),
            default_lines: parts.config.scrollback.default_lines,
            resize: ResizeCoordinator::new(),
            state: state_tx,
            sink: parts.sink,
            transport: Some(parts.transport),
            listener: parts.listener,
            pending: FuturesUnordered::new(),
        };
        task.transition(SessionState::Connecting);
        tokio::spawn(task.run(commands_rx, parts.events));

        Session {
            inner: Arc::new(Handle {
                id: parts.id,
                commands: commands_tx,
                state: state_rx,
                activation_offsets: parts.config.resize.activation_offsets().collect(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.clone()
    }

    /// Wait until the state satisfies `pred`. Returns the last known state if
    /// the session task has ended without satisfying it.
    pub async fn wait_for(&self, mut pred: impl FnMut(SessionState) -> bool) -> SessionState {
        let mut rx = self.subscribe_state();
        loop {
            let state = *rx.borrow_and_update();
            if pred(state) {
                return state;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Forward user input. Dropped unless the transport is open.
    pub fn send_input(&self, data: impl Into<String>) {
        self.post(Command::Input(data.into()));
    }

    /// Re-measure the hosting surface and resize if it changed.
    pub fn request_resize(&self) {
        self.post(Command::Resize);
    }

    /// Mark the owning UI surface active or hidden. Activation re-checks
    /// geometry at each configured offset; must be called inside a runtime.
    pub fn set_active(&self, active: bool) {
        self.post(Command::SetActive(active));
        if !active {
            return;
        }
        for offset in &self.inner.activation_offsets {
            if offset.is_zero() {
                self.request_resize();
                continue;
            }
            let commands = self.inner.commands.clone();
            let offset = *offset;
            tokio::spawn(async move {
                tokio::time::sleep(offset).await;
                let _ = commands.send(Command::Resize);
            });
        }
    }

    /// Read the last rendered lines locally, without going through the
    /// transport. Works in every state except Disposed, which yields `None`.
    pub async fn scrollback(&self, request: ScrollbackRequest) -> Option<ScrollbackResponse> {
        let (reply, response) = oneshot::channel();
        self.post(Command::Scrollback { request, reply });
        response.await.ok()
    }

    pub fn ptr_eq(a: &Session, b: &Session) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn dispose(&self) {
        self.post(Command::Dispose);
    }

    /// Commands to a finished task are dropped.
    fn post(&self, command: Command) {
        let _ = self.inner.commands.send(command);
    }
}

type PendingWrite = BoxFuture<'static, usize>;

struct SessionTask {
    id: SessionId,
    target: String,
    flow: FlowController,
    default_lines: usize,
    resize: ResizeCoordinator,
    state: watch::Sender<SessionState>,
    sink: Box<dyn Sink>,
    transport: Option<Box<dyn Transport>>,
    listener: Option<ConnectionListener>,
    /// Sink writes not yet rendered, each resolving to its byte count.
    pending: FuturesUnordered<PendingWrite>,
}

impl SessionTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: EventReceiver,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Dispose) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = events.recv() => self.handle_event(event),
                Some(len) = self.pending.next(), if !self.pending.is_empty() => {
                    self.on_rendered(len);
                }
            }
        }
        self.dispose();
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&mut self, next: SessionState) -> bool {
        let current = self.current();
        if !current.can_transition_to(next) {
            debug!(session = %self.id, from = %current, to = %next, "ignoring state transition");
            return false;
        }
        self.state.send_replace(next);
        debug!(session = %self.id, from = %current, to = %next, "session state changed");
        true
    }

    fn notify(&self, connected: bool) {
        if let Some(listener) = &self.listener {
            listener(&self.id, connected);
        }
    }

    fn send(&mut self, frame: ControlFrame) {
        let kind = frame.kind();
        let Some(transport) = self.transport.as_mut() else {
            debug!(session = %self.id, kind, "no transport, dropping outbound frame");
            return;
        };
        let result = protocol::encode(&frame)
            .map_err(Into::into)
            .and_then(|message| transport.send(message));
        if let Err(err) = result {
            warn!(session = %self.id, kind, error = %err, "failed to send control frame");
        }
    }

    fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    // ── Commands from the UI ────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Input(data) => {
                if self.current().is_connected() {
                    self.send(ControlFrame::TermInput { data });
                } else {
                    debug!(session = %self.id, state = %self.current(), "dropping input, not connected");
                }
            }
            Command::Resize => self.on_resize_trigger(),
            Command::SetActive(active) => self.resize.set_active(active),
            Command::Scrollback { request, reply } => {
                let response = self.answer(&request);
                let _ = reply.send(response);
            }
            Command::Dispose => {}
        }
    }

    fn on_resize_trigger(&mut self) {
        let proposed = self.sink.propose_geometry();
        let Some(geometry) = self.resize.propose(proposed) else {
            return;
        };
        self.sink.resize(geometry);
        debug!(session = %self.id, %geometry, "applied geometry");
        if self.current().is_connected() {
            self.send(geometry.to_frame());
        }
    }

    // ── Transport events ────────────────────────────────────────────

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Closed => self.on_closed(),
            TransportEvent::Error(reason) => self.on_error(reason),
        }
    }

    fn on_open(&mut self) {
        let current = self.current();
        if !current.can_transition_to(SessionState::Open) {
            debug!(session = %self.id, state = %current, "ignoring open event");
            return;
        }
        info!(session = %self.id, target = %self.target, "transport open");

        // The remote maps this connection to the tab only after SetSessionId,
        // so it must precede every other frame.
        self.send(ControlFrame::TermSetSessionId {
            session_id: self.id.clone(),
        });
        let geometry = self.open_geometry();
        if geometry != self.sink.geometry() {
            self.sink.resize(geometry);
        }
        self.resize.record(geometry);
        self.send(geometry.to_frame());

        self.sink
            .write_status(&format!("\r\n\x1b[32mConnecting to {}...\x1b[m", self.target));
        self.notify(true);
        self.transition(SessionState::Open);

        // Backlog built up while connecting; the pause could not be sent then.
        if self.flow.is_paused() {
            info!(session = %self.id, accumulated = self.flow.accumulated(), "paused remote output");
            self.send(ControlFrame::TermPause { pause: true });
            self.transition(SessionState::Paused);
        }
    }

    fn open_geometry(&self) -> Geometry {
        let proposed = if self.resize.is_active() {
            self.sink.propose_geometry()
        } else {
            None
        };
        proposed
            .filter(|g| g.rows > 0 && g.cols > 0)
            .unwrap_or_else(|| self.sink.geometry())
    }

    // Effects land before the state is published, so a watcher that sees the
    // new state also sees the status line and listener call.
    fn on_closed(&mut self) {
        match self.current() {
            SessionState::Failed => {
                debug!(session = %self.id, "transport closed after error");
                self.release_transport();
                return;
            }
            state if state.is_finished() => return,
            _ => {}
        }
        info!(session = %self.id, "transport closed by remote");
        self.release_transport();
        self.sink.write_status(CLOSED_LINE);
        self.notify(false);
        self.transition(SessionState::ClosedRemote);
    }

    fn on_error(&mut self, reason: String) {
        if self.current().is_finished() {
            debug!(session = %self.id, %reason, "transport error after close");
            return;
        }
        // The transport stays up until it reports Closed so the remote can
        // still query scrollback.
        warn!(session = %self.id, %reason, "transport error");
        self.sink.write_status(ERROR_LINE);
        self.notify(false);
        self.transition(SessionState::Failed);
    }

    fn on_message(&mut self, message: TransportMessage) {
        match protocol::decode(message) {
            Ok(Inbound::Output(bytes)) => self.on_output(bytes),
            Ok(Inbound::Control(frame)) => self.on_control(frame),
            Err(err) => warn!(session = %self.id, error = %err, "dropping inbound frame"),
        }
    }

    // ── Output and flow control ─────────────────────────────────────

    fn on_output(&mut self, bytes: Bytes) {
        let len = bytes.len();
        let rendered = self.sink.write(bytes);
        self.pending.push(
            async move {
                let _ = rendered.await;
                len
            }
            .boxed(),
        );
        if let Some(signal) = self.flow.admit(len) {
            self.apply_flow(signal);
        }
    }

    fn on_rendered(&mut self, len: usize) {
        if let Some(signal) = self.flow.complete(len) {
            self.apply_flow(signal);
        }
    }

    fn apply_flow(&mut self, signal: FlowSignal) {
        let accumulated = self.flow.accumulated();
        if !self.current().is_connected() {
            // SetSessionId must be the first frame; on_open replays a pending pause.
            debug!(session = %self.id, accumulated, ?signal, "flow signal while not connected");
            return;
        }
        self.send(ControlFrame::TermPause {
            pause: signal.pause(),
        });
        match signal {
            FlowSignal::Pause => {
                info!(session = %self.id, accumulated, "paused remote output");
                if self.current() == SessionState::Open {
                    self.transition(SessionState::Paused);
                }
            }
            FlowSignal::Resume => {
                info!(session = %self.id, accumulated, "resumed remote output");
                if self.current() == SessionState::Paused {
                    self.transition(SessionState::Open);
                }
            }
        }
    }

    // ── Control frames ──────────────────────────────────────────────

    fn on_control(&mut self, frame: ControlFrame) {
        match frame {
            ControlFrame::TermOutputRequest { request_id, lines } => {
                let request = ScrollbackRequest::new(request_id, lines);
                let response = self.answer(&request);
                self.send(ControlFrame::TermOutputResponse(response));
            }
            ControlFrame::Status { data } => self.on_status(data),
            ControlFrame::Error { message } => {
                warn!(session = %self.id, %message, "remote reported error");
                self.sink
                    .write_status(&format!("\r\n\x1b[31mError: {message}\x1b[m"));
            }
            ControlFrame::ThemeChange { theme_options } => self.sink.set_theme(&theme_options),
            other => {
                warn!(session = %self.id, kind = other.kind(), "dropping unexpected inbound control frame");
            }
        }
    }

    fn answer(&mut self, request: &ScrollbackRequest) -> ScrollbackResponse {
        let response = scrollback::respond(self.sink.as_mut(), request, self.default_lines);
        debug!(
            session = %self.id,
            request_id = %response.request_id,
            returned = response.output.len(),
            success = response.success,
            "answering output request"
        );
        response
    }

    fn on_status(&mut self, report: StatusReport) {
        match report.status {
            StatusKind::Disconnected => {
                info!(session = %self.id, message = %report.message, "remote disconnected");
                self.sink
                    .write_status(&format!("\r\n\x1b[33m{}\x1b[m", report.message));
                self.notify(false);
            }
            StatusKind::Error => {
                warn!(session = %self.id, message = %report.message, "remote connection error");
                self.sink.write_status(&format!(
                    "\r\n\x1b[31mConnection Error: {}\x1b[m",
                    report.message
                ));
                self.notify(false);
            }
            status => {
                debug!(session = %self.id, ?status, message = %report.message, "remote status");
            }
        }
    }

    fn dispose(&mut self) {
        self.transition(SessionState::Disposed);
        self.release_transport();
        self.pending = FuturesUnordered::new();
        info!(session = %self.id, "session disposed");
    }
}
