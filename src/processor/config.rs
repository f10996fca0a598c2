// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the batching engines.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default capacity of the scheduled-drain queue.
const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;

/// Default interval between two scheduled drains.
const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_secs(5);

/// Default upper bound of records per exported batch.
const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;

/// Default time to wait for a single export.
const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound of the whole shutdown sequence.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default ring capacity.
const DEFAULT_RING_BUFFER_SIZE: usize = 2048;

/// Configuration of the scheduled-drain [`BatchProcessor`](super::BatchProcessor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Capacity of the buffer holding records waiting for export.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Interval between two scheduled drains.
    #[serde(default = "default_schedule_delay", with = "humantime_serde")]
    pub schedule_delay: Duration,

    /// Upper bound of records per exported batch. A buffer holding at least
    /// this many records wakes the worker before the schedule.
    #[serde(default = "default_max_export_batch_size")]
    pub max_export_batch_size: usize,

    /// How long the worker waits for one export before counting it failed.
    #[serde(default = "default_export_timeout", with = "humantime_serde")]
    pub export_timeout: Duration,

    /// Bound of the final drain, export and exporter shutdown.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Producer behavior on a full buffer: block until space frees up
    /// (`true`) or drop the record (`false`).
    #[serde(default)]
    pub blocking: bool,

    /// Longest a blocking producer waits for space before its record is
    /// dropped. Unset means wait until space frees up or shutdown.
    #[serde(default, with = "humantime_serde")]
    pub enqueue_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            schedule_delay: DEFAULT_SCHEDULE_DELAY,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            blocking: false,
            enqueue_timeout: None,
        }
    }
}

impl BatchConfig {
    /// Set the queue capacity.
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the drain interval.
    #[must_use]
    pub fn with_schedule_delay(mut self, delay: Duration) -> Self {
        self.schedule_delay = delay;
        self
    }

    /// Set the batch size bound.
    #[must_use]
    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size;
        self
    }

    /// Set the per-export timeout.
    #[must_use]
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Set the shutdown bound.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the full-buffer policy.
    #[must_use]
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Bound the wait of blocking producers.
    #[must_use]
    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = Some(timeout);
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a zero queue size, a batch size outside
    /// `[1, max_queue_size]`, or a zero duration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "max_queue_size",
                value: self.max_queue_size,
            });
        }
        if self.max_export_batch_size == 0 || self.max_export_batch_size > self.max_queue_size {
            return Err(ConfigError::InvalidBatchSize {
                batch_size: self.max_export_batch_size,
                queue_size: self.max_queue_size,
            });
        }
        check_positive("schedule_delay", self.schedule_delay)?;
        check_positive("export_timeout", self.export_timeout)?;
        if let Some(timeout) = self.enqueue_timeout {
            check_positive("enqueue_timeout", timeout)?;
        }
        check_positive("shutdown_timeout", self.shutdown_timeout)
    }
}

/// How the ring consumer idles while no event is available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Park on the channel until an event arrives.
    Blocking,
    /// Spin continuously. Lowest latency, burns a core.
    BusySpin,
    /// Spin `spin_tries` times, then yield the thread between polls.
    Yielding {
        /// Polls before the first yield.
        #[serde(default = "default_spin_tries")]
        spin_tries: u32,
    },
    /// Spin `spin_tries` times, then sleep `park` between polls.
    Sleeping {
        /// Polls before the first sleep.
        #[serde(default = "default_spin_tries")]
        spin_tries: u32,
        /// Sleep between polls once spinning gave up.
        #[serde(default = "default_park", with = "humantime_serde")]
        park: Duration,
    },
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Sleeping {
            spin_tries: default_spin_tries(),
            park: default_park(),
        }
    }
}

/// Configuration of the single-consumer [`RingProcessor`](super::RingProcessor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RingConfig {
    /// Number of events the ring holds. Must be a power of two.
    #[serde(default = "default_ring_buffer_size")]
    pub buffer_size: usize,

    /// Producer behavior on a full ring: block until the consumer catches
    /// up (`true`) or reject the event (`false`).
    #[serde(default = "default_ring_blocking")]
    pub blocking: bool,

    /// Consumer idle behavior.
    #[serde(default)]
    pub wait_strategy: WaitStrategy,

    /// Bound of the shutdown sequence.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_RING_BUFFER_SIZE,
            blocking: default_ring_blocking(),
            wait_strategy: WaitStrategy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl RingConfig {
    /// Set the ring capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the full-ring policy.
    #[must_use]
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Set the consumer idle behavior.
    #[must_use]
    pub fn with_wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = strategy;
        self
    }

    /// Set the shutdown bound.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a zero or non power of two ring size, a
    /// zero sleeping park, or a zero shutdown timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "buffer_size",
                value: self.buffer_size,
            });
        }
        if !self.buffer_size.is_power_of_two() {
            return Err(ConfigError::RingSizeNotPowerOfTwo {
                size: self.buffer_size,
            });
        }
        if let WaitStrategy::Sleeping { park, .. } = self.wait_strategy {
            check_positive("park", park)?;
        }
        check_positive("shutdown_timeout", self.shutdown_timeout)
    }
}

fn check_positive(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidDuration { name, value });
    }
    Ok(())
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_schedule_delay() -> Duration {
    DEFAULT_SCHEDULE_DELAY
}

fn default_max_export_batch_size() -> usize {
    DEFAULT_MAX_EXPORT_BATCH_SIZE
}

fn default_export_timeout() -> Duration {
    DEFAULT_EXPORT_TIMEOUT
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

fn default_ring_buffer_size() -> usize {
    DEFAULT_RING_BUFFER_SIZE
}

fn default_ring_blocking() -> bool {
    true
}

fn default_spin_tries() -> u32 {
    100
}

fn default_park() -> Duration {
    Duration::from_micros(100)
}
