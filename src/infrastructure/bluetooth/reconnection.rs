//! Exponential backoff for recovering a lost link.
//!
//! One reconnection *episode* runs from the first loss until either a
//! successful reconnect or exhaustion of the attempt budget. The policy owns
//! the attempt counter and the pending retry timer for that episode.

use crate::domain::models::PeripheralId;
use crate::domain::settings::ReconnectSettings;
use crate::infrastructure::bluetooth::backend::BleBackend;
use crate::infrastructure::bluetooth::timer::{TimerFired, TimerKind, TimerSlot};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl From<&ReconnectSettings> for BackoffConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
            max_attempts: settings.max_attempts,
        }
    }
}

impl BackoffConfig {
    /// `min(base * 2^attempts, max)`, saturating at `max` on overflow.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        2u32.checked_pow(attempts)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Reconnected,
    RetryScheduled(Duration),
}

/// What a retry timer fire asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryFire {
    /// Not the armed timer; nothing to do.
    Stale,
    /// Budget left: attempt again now.
    Attempt,
    /// The last backoff window elapsed with the budget spent. The counter is reset.
    Exhausted { attempts: u32 },
}

/// Attempt counter and retry timer for one reconnection episode
pub struct ReconnectionPolicy {
    config: BackoffConfig,
    attempts: u32,
    retry: TimerSlot,
}

impl ReconnectionPolicy {
    /// Create a new policy with an idle counter
    pub fn new(config: BackoffConfig, timer_sender: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            config,
            attempts: 0,
            retry: TimerSlot::new(TimerKind::ReconnectRetry, timer_sender),
        }
    }

    /// Tries to connect right now and books the result.
    ///
    /// Every failure arms the retry timer, including the last one allowed; the
    /// budget is checked when that timer fires.
    pub async fn attempt(&mut self, backend: &dyn BleBackend, id: &PeripheralId) -> AttemptOutcome {
        info!(%id, "Reconnection attempt {}", self.attempts + 1);

        match backend.connect(id).await {
            Ok(()) => {
                self.reset();
                AttemptOutcome::Reconnected
            }
            Err(e) => {
                let delay = self.config.delay_for(self.attempts);
                self.attempts += 1;

                warn!(%id, "Reconnection failed ({}). Trying again in {:?}", e, delay);
                self.retry.arm(delay);
                AttemptOutcome::RetryScheduled(delay)
            }
        }
    }

    /// Consumes a retry timer fire and decides between another attempt and giving up.
    pub fn on_timer(&mut self, generation: u64) -> RetryFire {
        if !self.retry.fire(generation) {
            return RetryFire::Stale;
        }
        if self.attempts < self.config.max_attempts {
            return RetryFire::Attempt;
        }

        info!("Maximum reconnection attempts reached");
        let attempts = self.attempts;
        self.reset();
        RetryFire::Exhausted { attempts }
    }

    /// Ends the episode: cancels any pending retry and zeroes the counter.
    pub fn reset(&mut self) {
        self.retry.cancel();
        self.attempts = 0;
    }

    /// Failed attempts in the current episode
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a retry is waiting for its backoff window
    pub fn retry_pending(&self) -> bool {
        self.retry.is_armed()
    }

    /// Get the backoff configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
