//! # Consecutive Error Tracker
//!
//! Counts consecutive loop failures in two classes. I/O-class failures have the lower
//! threshold so a dead store connection is rebuilt quickly; generic failures get more
//! headroom before the same reset. Any success clears both counters.

use tracing::{debug, warn};

use crate::error::PipelineError;

/// What the loop should do after recording a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep going with the next item
    Continue,
    /// Rebuild the store connection, then keep going
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct ConsecutiveErrorTracker {
    component: String,
    io_threshold: u32,
    generic_threshold: u32,
    io_errors: u32,
    generic_errors: u32,
}

impl ConsecutiveErrorTracker {
    pub fn new(component: impl Into<String>, io_threshold: u32, generic_threshold: u32) -> Self {
        Self {
            component: component.into(),
            io_threshold: io_threshold.max(1),
            generic_threshold: generic_threshold.max(1),
            io_errors: 0,
            generic_errors: 0,
        }
    }

    pub fn record_success(&mut self) {
        if self.io_errors > 0 || self.generic_errors > 0 {
            debug!(
                component = %self.component,
                io_errors = self.io_errors,
                generic_errors = self.generic_errors,
                "Error streak ended"
            );
        }
        self.reset();
    }

    /// Record a failure; crossing either threshold resets both counters and asks for a reconnect
    pub fn record_failure(&mut self, error: &PipelineError) -> ErrorAction {
        let reconnect = if error.is_io() {
            self.io_errors += 1;
            self.io_errors >= self.io_threshold
        } else {
            self.generic_errors += 1;
            self.generic_errors >= self.generic_threshold
        };

        if reconnect {
            warn!(
                component = %self.component,
                io_errors = self.io_errors,
                generic_errors = self.generic_errors,
                error_class = ?error.class(),
                "Consecutive error threshold reached, reconnecting"
            );
            self.reset();
            ErrorAction::Reconnect
        } else {
            ErrorAction::Continue
        }
    }

    pub fn io_errors(&self) -> u32 {
        self.io_errors
    }

    pub fn generic_errors(&self) -> u32 {
        self.generic_errors
    }

    fn reset(&mut self) {
        self.io_errors = 0;
        self.generic_errors = 0;
    }
}
