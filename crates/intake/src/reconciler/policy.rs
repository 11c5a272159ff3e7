//! Polling decisions, independent of any clock.

use std::time::Duration;

/// Result of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The awaited condition holds
    Ready,
    /// Something is there but not in its final state
    Partial,
    /// Nothing there yet
    Absent,
}

/// What the driver should do after a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sleep one interval and probe again
    Continue,
    /// Stop waiting, move on
    Proceed,
    /// Stop waiting, give up
    Fail,
}

/// Bounded wait.
///
/// `accept_partial` turns a `Partial` probe at the deadline into `Proceed`
/// instead of `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub accept_partial: bool,
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            accept_partial: false,
        }
    }

    pub fn accept_partial(mut self) -> Self {
        self.accept_partial = true;
        self
    }

    pub fn decide(&self, elapsed: Duration, probe: Probe) -> Decision {
        match probe {
            Probe::Ready => Decision::Proceed,
            _ if elapsed < self.timeout => Decision::Continue,
            Probe::Partial if self.accept_partial => Decision::Proceed,
            _ => Decision::Fail,
        }
    }

    /// Sleep before the next probe, never past the deadline
    pub fn next_sleep(&self, elapsed: Duration) -> Duration {
        self.interval.min(self.timeout.saturating_sub(elapsed))
    }
}
