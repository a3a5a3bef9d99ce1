//! Reconnect policy and gate for the agent connection
//!
//! The gate is the single authority on whether a reconnect may be
//! scheduled. Both the close handler and any in-flight connect attempt
//! consult it, which is what closes the race between an intentional
//! disconnect and an asynchronous socket-close callback: the manual flag
//! is set before the socket is closed, so a close event that arrives
//! afterwards finds reconnection already forbidden.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Reconnect policy for the agent connection
///
/// The delay is fixed per attempt; the ceiling bounds how many times a
/// dropped connection is retried before the session gives up.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before each reconnect attempt
    pub delay: Duration,
    /// Maximum number of attempts before surfacing `rate_limited`
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

/// Shared reconnect state consulted by every connect decision
#[derive(Debug)]
pub struct ReconnectGate {
    policy: ReconnectPolicy,
    manual_disconnect: AtomicBool,
    attempts: AtomicU32,
    rate_limited: AtomicBool,
}

impl ReconnectGate {
    /// Create a gate with the given policy
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            manual_disconnect: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            rate_limited: AtomicBool::new(false),
        }
    }

    /// Decide whether to reconnect after a close event
    ///
    /// Returns the delay to wait before the next attempt, or `None` when
    /// no attempt may be made (manual disconnect, or the attempt ceiling
    /// was reached; the latter also sets `rate_limited`).
    pub fn on_close(&self) -> Option<Duration> {
        if self.manual_disconnect.load(Ordering::SeqCst) {
            return None;
        }

        let used = self.attempts.fetch_add(1, Ordering::SeqCst);
        if used >= self.policy.max_attempts {
            // Undo the overshoot so the counter reflects attempts made
            self.attempts.store(self.policy.max_attempts, Ordering::SeqCst);
            self.rate_limited.store(true, Ordering::SeqCst);
            return None;
        }

        Some(self.policy.delay)
    }

    /// Record a successful open: the attempt counter starts over
    pub fn on_open(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// Mark the session manually disconnected
    ///
    /// Must be called before the socket is closed so the close event
    /// cannot schedule a reconnect.
    pub fn manual_disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::SeqCst);
    }

    /// Whether connecting is currently permitted at all
    #[must_use]
    pub fn may_connect(&self) -> bool {
        !self.manual_disconnect.load(Ordering::SeqCst)
    }

    /// Whether the attempt ceiling was exhausted
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited.load(Ordering::SeqCst)
    }

    /// Attempts made since the last successful open
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Clear every flag and counter for a fresh session
    pub fn reset(&self) {
        self.manual_disconnect.store(false, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
        self.rate_limited.store(false, Ordering::SeqCst);
    }
}
