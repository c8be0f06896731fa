//! Retry and rate pacing for transfers.
//!
//! The policy keeps one remote-level delay. It is zero while the remote is
//! healthy, grows geometrically with each transient failure (bounded by
//! `max_delay`), and snaps back to zero on the next success. Every dispatch,
//! fresh or retried, waits at least that long, so a throttling remote slows
//! the whole upload rather than one object at a time.
//!
//! Each object may fail transiently `max_retries` times. The next transient
//! failure abandons it.

use std::time::Duration;

use tracing::debug;

use tpush_protocol::TransferOutcome;

/// Tuning for [`PacingPolicy`].
#[derive(Clone, Debug, PartialEq)]
pub struct PacingConfig {
    /// Delay after the first transient failure.
    pub initial_delay: Duration,
    /// Cap on the delay, including delays requested by the remote.
    pub max_delay: Duration,
    /// Multiplier applied on each further failure.
    pub backoff_factor: f64,
    /// Transient failures tolerated per object before it is abandoned.
    pub max_retries: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_retries: 3,
        }
    }
}

/// What to do with an object after a transfer outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacingDecision {
    /// Success; carry on without delay.
    DispatchNow,
    /// Retry after waiting.
    Delay(Duration),
    /// Stop trying this object.
    Abandon,
}

#[derive(Clone, Debug)]
pub struct PacingPolicy {
    config: PacingConfig,
    current_delay: Duration,
    consecutive_failures: u32,
}

impl PacingPolicy {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            current_delay: Duration::ZERO,
            consecutive_failures: 0,
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Delay applied to every dispatch right now.
    pub fn request_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn is_backing_off(&self) -> bool {
        !self.current_delay.is_zero()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Fold one outcome into the policy. `failures` counts the transient
    /// failures seen for the object, including this one if it is transient.
    pub fn on_outcome(&mut self, outcome: &TransferOutcome, failures: u32) -> PacingDecision {
        match outcome {
            TransferOutcome::AlreadyPresent
            | TransferOutcome::Absent
            | TransferOutcome::Accepted => {
                if self.is_backing_off() {
                    debug!("remote recovered, clearing request delay");
                }
                self.current_delay = Duration::ZERO;
                self.consecutive_failures = 0;
                PacingDecision::DispatchNow
            }
            TransferOutcome::Transient { retry_after, .. } => {
                self.consecutive_failures += 1;
                self.current_delay = self.next_delay(*retry_after);
                if failures > self.config.max_retries {
                    PacingDecision::Abandon
                } else {
                    PacingDecision::Delay(self.current_delay)
                }
            }
            TransferOutcome::Fatal { .. } => PacingDecision::Abandon,
        }
    }

    fn next_delay(&self, requested: Option<Duration>) -> Duration {
        let backoff = if self.current_delay.is_zero() {
            self.config.initial_delay
        } else {
            let nanos = self.current_delay.as_nanos() as f64 * self.config.backoff_factor;
            Duration::from_nanos(nanos as u64)
        };
        let delay = match requested {
            Some(requested) => backoff.max(requested),
            None => backoff,
        };
        delay.min(self.config.max_delay)
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}
