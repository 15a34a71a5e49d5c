//! Bidirectional message transports.
//!
//! A [`Connector`] starts a connection without blocking and reports progress
//! as [`TransportEvent`]s on a channel owned by the session. Events for one
//! connection are delivered in arrival order.

pub mod memory;
pub mod unix;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::TransportMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(TransportMessage),
    Closed,
    Error(String),
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of one connection.
pub trait Transport: Send {
    fn send(&mut self, message: TransportMessage) -> Result<(), TransportError>;

    /// Tear the connection down. No events are reported afterwards.
    fn close(&mut self);
}

pub trait Connector: Send + Sync + 'static {
    /// Start connecting to `target`; must be called from within a tokio runtime.
    fn connect(&self, target: &str, events: EventSender) -> Box<dyn Transport>;
}
