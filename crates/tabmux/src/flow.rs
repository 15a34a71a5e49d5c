//! Watermark-based backpressure for one session.
//!
//! Output bytes count against the backlog from the moment they are handed to
//! the sink until the sink reports them rendered. Crossing the high
//! watermark asks the remote to pause; draining below the low watermark asks
//! it to resume. The gap between the two keeps the remote from flapping.

use crate::config::FlowConfig;

/// A pause state change that must be sent to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
    Pause,
    Resume,
}

impl FlowSignal {
    /// Value of the `pause` field in the outgoing `TermPause` frame.
    pub fn pause(self) -> bool {
        matches!(self, FlowSignal::Pause)
    }
}

#[derive(Debug, Clone)]
pub struct FlowController {
    high: usize,
    low: usize,
    accumulated: usize,
    paused: bool,
}

impl FlowController {
    pub fn new(high: usize, low: usize) -> Self {
        Self {
            high,
            low,
            accumulated: 0,
            paused: false,
        }
    }

    pub fn from_config(config: &FlowConfig) -> Self {
        Self::new(config.high_watermark, config.low_watermark)
    }

    /// Account for `len` bytes that were just handed to the sink.
    pub fn admit(&mut self, len: usize) -> Option<FlowSignal> {
        self.accumulated += len;
        if !self.paused && self.accumulated > self.high {
            self.paused = true;
            return Some(FlowSignal::Pause);
        }
        None
    }

    /// The sink finished rendering `len` previously admitted bytes.
    pub fn complete(&mut self, len: usize) -> Option<FlowSignal> {
        self.accumulated = self.accumulated.saturating_sub(len);
        if self.paused && self.accumulated < self.low {
            self.paused = false;
            return Some(FlowSignal::Resume);
        }
        None
    }

    pub fn accumulated(&self) -> usize {
        self.accumulated
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::from_config(&FlowConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 10_000;

    #[test]
    fn no_pause_at_or_below_high() {
        let mut flow = FlowController::default();
        for _ in 0..10 {
            assert_eq!(flow.admit(FRAME), None);
        }
        assert_eq!(flow.accumulated(), 100_000);
        assert!(!flow.is_paused());
    }

    #[test]
    fn eleventh_frame_pauses_once() {
        let mut flow = FlowController::default();
        let signals: Vec<_> = (0..12).map(|_| flow.admit(FRAME)).collect();
        assert_eq!(signals[10], Some(FlowSignal::Pause));
        assert_eq!(signals.iter().filter(|s| s.is_some()).count(), 1);
        assert!(flow.is_paused());
        assert_eq!(flow.accumulated(), 120_000);
    }

    #[test]
    fn resume_once_below_low() {
        let mut flow = FlowController::default();
        for _ in 0..12 {
            flow.admit(FRAME);
        }
        assert_eq!(flow.complete(100_000), None);
        assert_eq!(flow.accumulated(), 20_000);
        assert!(flow.is_paused(), "exactly LOW is not below LOW");

        assert_eq!(flow.complete(5_000), Some(FlowSignal::Resume));
        assert_eq!(flow.accumulated(), 15_000);
        assert!(!flow.is_paused());

        assert_eq!(flow.complete(FRAME), None);
        assert_eq!(flow.complete(5_000), None);
        assert_eq!(flow.accumulated(), 0);
    }

    #[test]
    fn completions_while_unpaused_never_resume() {
        let mut flow = FlowController::default();
        flow.admit(50_000);
        assert_eq!(flow.complete(50_000), None);
        assert_eq!(flow.accumulated(), 0);
    }

    #[test]
    fn admits_inside_the_band_do_not_repause() {
        let mut flow = FlowController::new(1_000, 200);
        assert_eq!(flow.admit(1_001), Some(FlowSignal::Pause));
        assert_eq!(flow.admit(5_000), None);
        assert_eq!(flow.complete(5_900), Some(FlowSignal::Resume));
        // 101 bytes outstanding, still under high
        assert_eq!(flow.admit(800), None);
        assert_eq!(flow.admit(100), Some(FlowSignal::Pause));
    }

    #[test]
    fn pause_signals_alternate() {
        let mut flow = FlowController::new(100, 10);
        let mut emitted = Vec::new();
        for _ in 0..5 {
            emitted.extend(flow.admit(60));
            emitted.extend(flow.admit(60));
            emitted.extend(flow.complete(60));
            emitted.extend(flow.complete(60));
        }
        assert!(!emitted.is_empty());
        for pair in emitted.windows(2) {
            assert_ne!(pair[0], pair[1], "duplicate signal in {emitted:?}");
        }
        assert_eq!(emitted[0], FlowSignal::Pause);
    }

    #[test]
    fn over_completion_saturates() {
        let mut flow = FlowController::new(100, 10);
        flow.admit(5);
        flow.complete(50);
        assert_eq!(flow.accumulated(), 0);
    }

    #[test]
    fn signal_pause_field() {
        assert!(FlowSignal::Pause.pause());
        assert!(!FlowSignal::Resume.pause());
    }
}
