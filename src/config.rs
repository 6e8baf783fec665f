//! Manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Limits;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub limits: Limits,
}

/// Retransmission backoff, in milliseconds.
///
/// Delays double from `initial_backoff_ms` up to `max_backoff_ms`. There is
/// no attempt cap: an unacknowledged update is retried until its framework
/// is cleaned up or its stream hits a terminal error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 10_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
