use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A text frame that could not be turned into a [`crate::protocol::ControlFrame`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("control frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("control frame has no `type` discriminator")]
    MissingType,
    #[error("unknown control frame type `{0}`")]
    UnknownType(String),
    #[error("malformed `{kind}` frame: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Failure reported by a rendering sink while reading back its buffer.
#[derive(Debug, Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
