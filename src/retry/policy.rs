// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Retry policy: attempt bound and exponential backoff parameters.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest accepted `max_attempts`.
pub const MIN_ATTEMPTS: u32 = 2;

/// Largest accepted `max_attempts`.
pub const MAX_ATTEMPTS: u32 = 5;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Immutable, validated retry configuration.
///
/// Deserializing goes through the same validation as [`RetryPolicy::new`],
/// so an invalid policy never exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyConfig", into = "RetryPolicyConfig")]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    ///
    /// # Errors
    ///
    /// - `InvalidMaxAttempts` if `max_attempts` is outside `[2, 5]`.
    /// - `InvalidDuration` if either backoff is zero.
    /// - `InvalidBackoffRange` if `max_backoff < initial_backoff`.
    /// - `InvalidMultiplier` if the multiplier is not finite and positive.
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if !(MIN_ATTEMPTS..=MAX_ATTEMPTS).contains(&max_attempts) {
            return Err(ConfigError::InvalidMaxAttempts {
                attempts: max_attempts,
                min: MIN_ATTEMPTS,
                max: MAX_ATTEMPTS,
            });
        }
        if initial_backoff.is_zero() {
            return Err(ConfigError::InvalidDuration {
                name: "initial_backoff",
                value: initial_backoff,
            });
        }
        if max_backoff.is_zero() {
            return Err(ConfigError::InvalidDuration {
                name: "max_backoff",
                value: max_backoff,
            });
        }
        if max_backoff < initial_backoff {
            return Err(ConfigError::InvalidBackoffRange {
                initial_backoff,
                max_backoff,
            });
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier <= 0.0 {
            return Err(ConfigError::InvalidMultiplier {
                multiplier: backoff_multiplier,
            });
        }
        Ok(Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        })
    }

    /// Maximum number of attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff ceiling before jitter for the first retry.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Upper bound of any backoff.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Growth factor between consecutive backoffs.
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Backoff ceiling after the failed attempt number `attempt` (1-based):
    /// `min(max_backoff, initial_backoff * multiplier^(attempt - 1))`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        // Exponent capped so huge attempt numbers cannot overflow to inf.
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Unvalidated form of [`RetryPolicy`], as found in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicyConfig {
    /// Maximum number of attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff ceiling for the first retry.
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound of any backoff.
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Growth factor between consecutive backoffs.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl TryFrom<RetryPolicyConfig> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(raw: RetryPolicyConfig) -> Result<Self, ConfigError> {
        RetryPolicy::new(
            raw.max_attempts,
            raw.initial_backoff,
            raw.max_backoff,
            raw.backoff_multiplier,
        )
    }
}

impl From<RetryPolicy> for RetryPolicyConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff: policy.initial_backoff,
            max_backoff: policy.max_backoff,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

fn default_backoff_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}
