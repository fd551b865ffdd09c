//! Reconnect scheduling.
//!
//! The schedule is plain state: how many attempts have failed and when the
//! next one is due. The monitor's driver task sleeps until that instant.

use core_runtime::EngineConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    base: Duration,
    max: Duration,
    attempts: u32,
    next_attempt_at: Option<Instant>,
}

impl ReconnectSchedule {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: 0,
            next_attempt_at: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// `min(base * 2^attempts, max)`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Failed attempts since the last time the monitor was online.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    /// Delay the next failure would schedule.
    pub fn next_delay(&self) -> Duration {
        self.delay_for(self.attempts)
    }

    /// Record a failed attempt and schedule the next one relative to `now`.
    ///
    /// Returns the attempt count the delay was computed from and the delay.
    pub fn schedule_next(&mut self, now: Instant) -> (u32, Duration) {
        let attempt = self.attempts;
        let delay = self.delay_for(attempt);
        self.attempts = self.attempts.saturating_add(1);
        self.next_attempt_at = Some(now + delay);
        (attempt, delay)
    }

    /// Whether a scheduled attempt is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.is_some_and(|at| at <= now)
    }

    /// Forget the pending attempt while one is in flight.
    pub fn take_due(&mut self) {
        self.next_attempt_at = None;
    }

    /// Back to zero on reaching ONLINE.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_attempt_at = None;
    }
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000), Duration::from_millis(30_000))
    }
}
