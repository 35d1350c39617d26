// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reconnect backoff for connection workers.
//
// A worker whose connect failed asks `Backoff` what to do next. Only
// transient failures are retried automatically, at most `max_attempts`
// times in a row; the wait grows as `min(base * 2^n + jitter, max)` with
// jitter drawn uniformly from `[0, base)` so printers that dropped together
// do not all come back at the same instant.

use std::time::Duration;

use rand::Rng;

use kuitti_core::config::BackoffConfig;
use kuitti_core::error::KuittiError;
use kuitti_core::types::ErrorClass;

/// Doublings beyond this cannot matter for any sane `max_delay`.
const MAX_DOUBLINGS: u32 = 16;

/// What a worker does after a failed connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Try again once this much time has passed.
    After(Duration),
    /// Wait for a caller; retrying on our own cannot help.
    Hold(ErrorClass),
    /// Every automatic attempt is used up.
    Exhausted,
}

/// The one reconnect policy shared by every device and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_attempts: config.max_attempts,
        }
    }

    /// Decide after `failures` consecutive failed automatic attempts.
    pub fn after_failure(&self, err: &KuittiError, failures: u32) -> Reconnect {
        match err.class() {
            ErrorClass::Transient if failures >= self.max_attempts => Reconnect::Exhausted,
            ErrorClass::Transient => Reconnect::After(self.delay(failures)),
            class => Reconnect::Hold(class),
        }
    }

    /// Wait before automatic attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::rng())
    }

    fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(MAX_DOUBLINGS));
        let jitter = if self.base_delay.is_zero() {
            Duration::ZERO
        } else {
            rng.random_range(Duration::ZERO..self.base_delay)
        };
        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}
