//! Terminal session multiplexing with flow-controlled output streaming.
//!
//! A [`Registry`] keeps one [`Session`] per stable tab id. Each session owns a
//! transport to a remote shell host and a [`Sink`] that renders output; UI
//! surfaces come and go without tearing the connection down.

pub mod config;
pub mod error;
pub mod flow;
pub mod protocol;
pub mod registry;
pub mod resize;
pub mod scrollback;
pub mod session;
pub mod sink;
pub mod transport;

pub use config::Config;
pub use error::{ConfigError, ProtocolError, SinkError, TransportError};
pub use flow::{FlowController, FlowSignal};
pub use protocol::{ControlFrame, ScrollbackResponse, StatusKind, StatusReport, TransportMessage};
pub use registry::Registry;
pub use resize::{Geometry, ResizeCoordinator};
pub use scrollback::ScrollbackRequest;
pub use session::{ConnectionListener, Session, SessionId, SessionState};
pub use sink::{LineSink, Sink, WriteCompletion};
pub use transport::{Connector, Transport, TransportEvent};
