use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::ControlFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

impl Geometry {
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    pub fn to_frame(self) -> ControlFrame {
        ControlFrame::TermResize {
            rows: self.rows,
            cols: self.cols,
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Collapses bursts of geometry triggers into effective changes.
///
/// Only the active surface may resize: a hidden container reports stale or
/// zero metrics.
#[derive(Debug, Default)]
pub struct ResizeCoordinator {
    last_applied: Option<Geometry>,
    active: bool,
}

impl ResizeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_applied(&self) -> Option<Geometry> {
        self.last_applied
    }

    /// Record geometry applied outside of a trigger, e.g. at transport open.
    pub fn record(&mut self, geometry: Geometry) {
        self.last_applied = Some(geometry);
    }

    /// Returns the geometry to apply and announce, if the trigger is effective.
    pub fn propose(&mut self, proposed: Option<Geometry>) -> Option<Geometry> {
        if !self.active {
            return None;
        }
        let geometry = proposed.filter(|g| g.rows > 0 && g.cols > 0)?;
        if self.last_applied == Some(geometry) {
            return None;
        }
        self.last_applied = Some(geometry);
        Some(geometry)
    }
}
