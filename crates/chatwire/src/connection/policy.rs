// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect decisions, kept free of I/O.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same interval before every attempt.
    #[default]
    Fixed,
    /// Interval doubles per attempt, capped at `max_ms`.
    Exponential { max_ms: u64 },
}

/// Outcome of one reconnect evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    /// Decide what follows an unexpected loss, given the attempts already
    /// made since the last explicit connect.
    pub fn decide(&self, attempts: u32) -> Decision {
        if attempts >= self.max_attempts {
            return Decision::GiveUp;
        }
        let attempt = attempts + 1;
        Decision::Retry { attempt, delay: self.delay(attempt) }
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max_ms } => {
                let shift = attempt.saturating_sub(1).min(31);
                let ms = (self.interval.as_millis() as u64).saturating_mul(1u64 << shift);
                Duration::from_millis(ms.min(max_ms))
            }
        }
    }
}
