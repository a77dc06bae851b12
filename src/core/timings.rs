//! Delays and bounded waits used by the link engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Link timing parameters, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkTimings {
    /// Pause after driving the control lines on connect
    pub control_settle_ms: u64,
    /// Gap between the bytes of the wake sequence
    pub wake_gap_ms: u64,
    /// Wait for the raw REPL banner and prompt
    pub raw_entry_timeout_ms: u64,
    /// Wait for each part of the raw-paste probe reply
    pub probe_timeout_ms: u64,
    /// Wait for the rest of a legacy device's prompt after a probe
    pub legacy_prompt_timeout_ms: u64,
    /// Wait for a flow-control or acknowledgement byte
    pub flow_timeout_ms: u64,
    /// Pause before leaving raw mode, letting trailing output arrive
    pub close_drain_ms: u64,
    /// Pause after leaving raw mode
    pub close_settle_ms: u64,
    /// Wait for a program's complete output in `exec`
    pub exec_timeout_ms: u64,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            control_settle_ms: 100,
            wake_gap_ms: 50,
            raw_entry_timeout_ms: 2000,
            probe_timeout_ms: 1000,
            legacy_prompt_timeout_ms: 1000,
            flow_timeout_ms: 5000,
            close_drain_ms: 100,
            close_settle_ms: 100,
            exec_timeout_ms: 10_000,
        }
    }
}

impl LinkTimings {
    /// Same timeouts, no fixed pauses. Suited to in-memory transports.
    #[must_use]
    pub fn without_pauses(mut self) -> Self {
        self.control_settle_ms = 0;
        self.wake_gap_ms = 0;
        self.close_drain_ms = 0;
        self.close_settle_ms = 0;
        self
    }

    pub(crate) fn control_settle(&self) -> Duration {
        Duration::from_millis(self.control_settle_ms)
    }

    pub(crate) fn wake_gap(&self) -> Duration {
        Duration::from_millis(self.wake_gap_ms)
    }

    pub(crate) fn raw_entry_timeout(&self) -> Duration {
        Duration::from_millis(self.raw_entry_timeout_ms)
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub(crate) fn legacy_prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.legacy_prompt_timeout_ms)
    }

    pub(crate) fn flow_timeout(&self) -> Duration {
        Duration::from_millis(self.flow_timeout_ms)
    }

    pub(crate) fn close_drain(&self) -> Duration {
        Duration::from_millis(self.close_drain_ms)
    }

    pub(crate) fn close_settle(&self) -> Duration {
        Duration::from_millis(self.close_settle_ms)
    }

    pub(crate) fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }
}
