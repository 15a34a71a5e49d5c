//! Answers remote requests for the last N rendered lines.

use tracing::warn;

use crate::error::SinkError;
use crate::protocol::{DebugInfo, ScrollbackResponse};
use crate::sink::Sink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollbackRequest {
    pub request_id: String,
    pub lines: Option<i64>,
}

impl ScrollbackRequest {
    pub fn new(request_id: impl Into<String>, lines: Option<i64>) -> Self {
        Self {
            request_id: request_id.into(),
            lines,
        }
    }

    /// Requested count, with absent or non-positive values mapped to `default`.
    pub fn requested_lines(&self, default: usize) -> usize {
        match self.lines {
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            _ => default,
        }
    }
}

/// Build the response for `request`. Never fails: errors land in the response.
pub fn respond(
    sink: &mut dyn Sink,
    request: &ScrollbackRequest,
    default_lines: usize,
) -> ScrollbackResponse {
    match collect(sink, request.requested_lines(default_lines)) {
        Ok((output, debug_info)) => ScrollbackResponse {
            request_id: request.request_id.clone(),
            output,
            success: true,
            error: String::new(),
            debug_info: Some(debug_info),
        },
        Err(err) => ScrollbackResponse {
            request_id: request.request_id.clone(),
            output: Vec::new(),
            success: false,
            error: err.to_string(),
            debug_info: None,
        },
    }
}

fn collect(sink: &mut dyn Sink, requested: usize) -> Result<(Vec<String>, DebugInfo), SinkError> {
    let total = sink.line_count()?;

    // Rows below the last output are blank; anchor the window on content.
    let mut end = total;
    while end > 0 && is_blank(&read_line(&*sink, end - 1)) {
        end -= 1;
    }
    let start = end.saturating_sub(requested);

    let lines: Vec<String> = (start..end).map(|index| read_line(&*sink, index)).collect();
    let mut output = trim_blank_edges(lines);
    if output.is_empty() {
        output = selection_fallback(sink, requested)?;
    }

    let debug_info = DebugInfo {
        total_lines: total,
        requested_lines: requested,
        start,
        end,
        returned: output.len(),
    };
    Ok((output, debug_info))
}

/// A line that cannot be read is reported as empty.
fn read_line(sink: &dyn Sink, index: usize) -> String {
    match sink.line(index) {
        Ok(line) => line.unwrap_or_default(),
        Err(err) => {
            warn!(line = index, error = %err, "failed to read scrollback line");
            String::new()
        }
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Drop blank lines at both ends, keeping interior ones.
fn trim_blank_edges(mut lines: Vec<String>) -> Vec<String> {
    let Some(last) = lines.iter().rposition(|l| !is_blank(l)) else {
        return Vec::new();
    };
    lines.truncate(last + 1);
    let first = lines.iter().position(|l| !is_blank(l)).unwrap_or(0);
    lines.drain(..first);
    lines
}

fn selection_fallback(sink: &mut dyn Sink, requested: usize) -> Result<Vec<String>, SinkError> {
    sink.select_all()?;
    let selection = sink.selection();
    sink.clear_selection();
    let Some(text) = selection? else {
        return Ok(Vec::new());
    };

    let all: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let tail = &all[all.len().saturating_sub(requested)..];
    Ok(tail
        .iter()
        .filter(|l| !is_blank(l))
        .map(|l| l.to_string())
        .collect())
}
