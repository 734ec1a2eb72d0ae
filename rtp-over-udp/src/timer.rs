//! Timeout and retry policy shared by both engines.
//!
//! Neither engine runs background timers.  Each loop iteration issues exactly
//! one receive bounded by a timeout; expiry of that timeout is the retry
//! signal, not an error:
//! - Handshake: START is resent on every expiry, forever unless
//!   [`TimerConfig::max_handshake_attempts`] caps it.
//! - Data: the whole outstanding window is resent once
//!   [`TimerConfig::poll_interval`] passes without the window sliding.
//! - Teardown: END is resent until its ACK arrives or
//!   [`TimerConfig::close_deadline`] passes, then the sender force-closes.
//!
//! All clocks are [`tokio::time::Instant`] so a paused test runtime can drive
//! them.

use std::time::Duration;

use tokio::time::Instant;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Timeout of a single receive call, and the retransmission interval.
    pub poll_interval: Duration,
    /// Wall-clock budget for the END handshake before force-closing.
    pub close_deadline: Duration,
    /// Give up on START after this many transmissions.  `None` retries forever.
    pub max_handshake_attempts: Option<u32>,
    /// Receiver gives up if the bound peer is silent this long.  `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            close_deadline: Duration::from_millis(500),
            max_handshake_attempts: None,
            idle_timeout: None,
        }
    }
}

/// A fixed point in time after which an operation stops waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Time left, or [`Duration::ZERO`] once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// The shorter of `cap` and the time left.
    pub fn clamp(&self, cap: Duration) -> Duration {
        self.remaining().min(cap)
    }
}

/// Counts handshake transmissions against an optional cap.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    attempts: u32,
    limit: Option<u32>,
}

impl RetryBudget {
    pub fn new(limit: Option<u32>) -> Self {
        Self { attempts: 0, limit }
    }

    /// Record one more attempt.  Returns `false` once the cap is exceeded.
    pub fn try_consume(&mut self) -> bool {
        if self.limit.is_some_and(|limit| self.attempts >= limit) {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
