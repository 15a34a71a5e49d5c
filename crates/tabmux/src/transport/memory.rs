//! In-process transport for embedding and tests.
//!
//! Every `connect` hands a [`RemoteEnd`] to the connector's queue. The remote
//! end drives the session by injecting events and observes what the session
//! sends back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connector, EventSender, Transport, TransportEvent};
use crate::error::TransportError;
use crate::protocol::{self, ControlFrame, TransportMessage};

#[derive(Default)]
struct Inner {
    remotes: VecDeque<RemoteEnd>,
    connects: usize,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `connect` calls so far.
    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    /// Oldest remote end not yet taken.
    pub fn take_remote(&self) -> Option<RemoteEnd> {
        self.inner.lock().remotes.pop_front()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, target: &str, events: EventSender) -> Box<dyn Transport> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let remote = RemoteEnd {
            target: target.to_string(),
            events,
            outbound: outbound_rx,
            closed: Arc::clone(&closed),
        };
        let mut inner = self.inner.lock();
        inner.connects += 1;
        inner.remotes.push_back(remote);
        Box::new(MemoryTransport {
            outbound: outbound_tx,
            closed,
        })
    }
}

struct MemoryTransport {
    outbound: mpsc::UnboundedSender<TransportMessage>,
    closed: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: TransportMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The far side of an in-memory connection.
///
/// Event injectors return whether the session was still listening.
pub struct RemoteEnd {
    target: String,
    events: EventSender,
    outbound: mpsc::UnboundedReceiver<TransportMessage>,
    closed: Arc<AtomicBool>,
}

impl RemoteEnd {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The session closed its side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn close(&self) -> bool {
        self.emit(TransportEvent::Closed)
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(reason.into()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(TransportMessage::Text(text.into())))
    }

    pub fn send_control(&self, frame: &ControlFrame) -> bool {
        match protocol::encode(frame) {
            Ok(message) => self.emit(TransportEvent::Message(message)),
            Err(_) => false,
        }
    }

    pub fn send_binary(&self, bytes: impl Into<Bytes>) -> bool {
        self.emit(TransportEvent::Message(TransportMessage::Binary(bytes.into())))
    }

    /// Next message the session sent, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransportMessage> {
        self.outbound.try_recv().ok()
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
