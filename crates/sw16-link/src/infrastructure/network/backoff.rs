//! Reconnect delay policy.
//!
//! Network loss is never fatal: the connection manager retries forever.  The
//! backoff only decides how long to wait between attempts.
//!
//! With the default policy (fibonacci, 1 s initial, 30 s cap) the delays are
//! `1, 1, 2, 3, 5, 8, 13, 21, 30, 30, …` seconds.  The sequence restarts from
//! the beginning after every successful connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Growth curve of successive delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `d, d, 2d, 3d, 5d, 8d, …`
    #[default]
    Fibonacci,
    /// `d, 2d, 4d, 8d, …`
    Exponential,
}

/// Parameters of a [`Backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Fibonacci,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Stateful delay generator.  Never runs out of attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    previous: Duration,
    current: Duration,
    attempts: u64,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let current = policy.initial_delay.min(policy.max_delay);
        Self {
            policy,
            previous: Duration::ZERO,
            current,
            attempts: 0,
        }
    }

    /// Returns the delay before the next attempt and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.policy.max_delay);
        let grown = match self.policy.strategy {
            BackoffStrategy::Fibonacci => self.previous.saturating_add(self.current),
            BackoffStrategy::Exponential => self.current.saturating_mul(2),
        };
        self.previous = self.current;
        self.current = grown.min(self.policy.max_delay);
        self.attempts += 1;
        delay
    }

    /// Restarts the sequence at the initial delay.
    pub fn reset(&mut self) {
        self.previous = Duration::ZERO;
        self.current = self.policy.initial_delay.min(self.policy.max_delay);
        self.attempts = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
