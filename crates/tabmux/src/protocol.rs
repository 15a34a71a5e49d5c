//! Control frames and the text/binary split of the transport.
//!
//! Control frames travel as UTF-8 JSON objects tagged by a `type` field.
//! Everything else on the transport is raw terminal output.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

// ── Frame kinds (must match the remote side) ─────────────────────────

pub const TYPE_SET_SESSION_ID: &str = "TermSetSessionId";
pub const TYPE_RESIZE: &str = "TermResize";
pub const TYPE_INPUT: &str = "TermInput";
pub const TYPE_PAUSE: &str = "TermPause";
pub const TYPE_OUTPUT_REQUEST: &str = "TermOutputRequest";
pub const TYPE_OUTPUT_RESPONSE: &str = "TermOutputResponse";
pub const TYPE_STATUS: &str = "status";
pub const TYPE_ERROR: &str = "error";
pub const TYPE_CHANGE_THEME: &str = "change-theme";

const KNOWN_TYPES: [&str; 9] = [
    TYPE_SET_SESSION_ID,
    TYPE_RESIZE,
    TYPE_INPUT,
    TYPE_PAUSE,
    TYPE_OUTPUT_REQUEST,
    TYPE_OUTPUT_RESPONSE,
    TYPE_STATUS,
    TYPE_ERROR,
    TYPE_CHANGE_THEME,
];

/// One message as carried by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    TermSetSessionId {
        session_id: String,
    },
    TermResize {
        rows: u16,
        cols: u16,
    },
    TermInput {
        data: String,
    },
    TermPause {
        pause: bool,
    },
    TermOutputRequest {
        request_id: String,
        #[serde(default)]
        lines: Option<i64>,
    },
    TermOutputResponse(ScrollbackResponse),
    #[serde(rename = "status")]
    Status {
        data: StatusReport,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(rename = "change-theme")]
    ThemeChange {
        #[serde(rename = "themeOptions")]
        theme_options: Value,
    },
}

impl ControlFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlFrame::TermSetSessionId { .. } => TYPE_SET_SESSION_ID,
            ControlFrame::TermResize { .. } => TYPE_RESIZE,
            ControlFrame::TermInput { .. } => TYPE_INPUT,
            ControlFrame::TermPause { .. } => TYPE_PAUSE,
            ControlFrame::TermOutputRequest { .. } => TYPE_OUTPUT_REQUEST,
            ControlFrame::TermOutputResponse(_) => TYPE_OUTPUT_RESPONSE,
            ControlFrame::Status { .. } => TYPE_STATUS,
            ControlFrame::Error { .. } => TYPE_ERROR,
            ControlFrame::ThemeChange { .. } => TYPE_CHANGE_THEME,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Connecting,
    Connected,
    Disconnected,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: StatusKind,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollbackResponse {
    pub request_id: String,
    #[serde(default)]
    pub output: Vec<String>,
    pub success: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub total_lines: usize,
    pub requested_lines: usize,
    pub start: usize,
    pub end: usize,
    pub returned: usize,
}

/// A decoded inbound transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ControlFrame),
    Output(Bytes),
}

/// Classify a transport message. Binary payload is never inspected.
pub fn decode(message: TransportMessage) -> Result<Inbound, ProtocolError> {
    match message {
        TransportMessage::Binary(bytes) => Ok(Inbound::Output(bytes)),
        TransportMessage::Text(text) => decode_control(&text).map(Inbound::Control),
    }
}

/// Validate the discriminator first so an unknown kind is reported as such
/// instead of as a generic shape mismatch.
pub fn decode_control(text: &str) -> Result<ControlFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Json)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }
    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { kind, source })
}

pub fn encode(frame: &ControlFrame) -> Result<TransportMessage, serde_json::Error> {
    serde_json::to_string(frame).map(TransportMessage::Text)
}
