// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the batching pipeline.
//!
//! Configuration problems are reported once, when a component is built.
//! Everything that can go wrong while records are moving is an [`ExportError`]
//! and travels through an [`AsyncResult`](crate::AsyncResult).

use std::time::Duration;

/// Outcome of an export, flush or shutdown.
pub type ExportResult = Result<(), ExportError>;

/// Errors raised while building a pipeline component.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The background worker thread could not be started.
    #[error("Failed to spawn worker thread {name}: {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Invalid configuration, rejected at construction.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A capacity (queue size, ring size, buffer capacity) is zero.
    #[error("Invalid capacity for {name}: {value}. Capacity must be greater than zero.")]
    InvalidCapacity {
        /// Name of the option.
        name: &'static str,
        /// The rejected value.
        value: usize,
    },

    /// The export batch size is zero or larger than the queue.
    #[error("Invalid max export batch size: {batch_size}. Must be in [1, {queue_size}].")]
    InvalidBatchSize {
        /// The rejected batch size.
        batch_size: usize,
        /// The configured queue size.
        queue_size: usize,
    },

    /// The ring size is not a power of two.
    #[error("Invalid ring buffer size: {size}. Size must be a power of two.")]
    RingSizeNotPowerOfTwo {
        /// The rejected size.
        size: usize,
    },

    /// A duration option is zero.
    #[error("Invalid duration for {name}: {value:?}. Duration must be positive.")]
    InvalidDuration {
        /// Name of the option.
        name: &'static str,
        /// The rejected value.
        value: Duration,
    },

    /// Retry attempts outside the supported range.
    #[error("Invalid max attempts: {attempts}. Must be in [{min}, {max}].")]
    InvalidMaxAttempts {
        /// The rejected attempt count.
        attempts: u32,
        /// Smallest accepted value.
        min: u32,
        /// Largest accepted value.
        max: u32,
    },

    /// The backoff ceiling is below the initial backoff.
    #[error("Invalid max backoff: {max_backoff:?} is less than initial backoff {initial_backoff:?}.")]
    InvalidBackoffRange {
        /// The configured initial backoff.
        initial_backoff: Duration,
        /// The rejected ceiling.
        max_backoff: Duration,
    },

    /// The backoff multiplier is not finite and positive.
    #[error("Invalid backoff multiplier: {multiplier}. Multiplier must be finite and positive.")]
    InvalidMultiplier {
        /// The rejected multiplier.
        multiplier: f64,
    },
}

/// A failed export, flush or shutdown.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The exporter reported a failure.
    #[error("Export failed: {message}")]
    Failed {
        /// Description from the exporter.
        message: String,
    },

    /// The operation did not complete within its deadline.
    #[error("Export timed out after {timeout:?}")]
    Timeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The transport rejected the request and retrying would not help.
    #[error("Non-retryable transport failure on attempt {attempt}: {message}")]
    NonRetryable {
        /// Attempt number (1-based) that failed.
        attempt: u32,
        /// Transport error description.
        message: String,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("Retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last transport error description.
        message: String,
    },

    /// A backoff sleep was interrupted.
    #[error("Export interrupted during backoff after {attempts} attempts")]
    Interrupted {
        /// Number of attempts made before the interruption.
        attempts: u32,
    },

    /// A delegate exporter panicked instead of returning a result.
    #[error("Exporter #{index} panicked: {message}")]
    ExporterPanicked {
        /// Position of the delegate.
        index: usize,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The batch could not be encoded.
    #[error("Batch encoding failed: {message}")]
    Encoding {
        /// Encoder error description.
        message: String,
    },

    /// The component was already shut down.
    #[error("Already shut down")]
    Shutdown,

    /// The background worker is gone.
    #[error("Background worker unavailable")]
    WorkerUnavailable,
}

impl ExportError {
    /// Build a generic failure from anything printable.
    pub fn failed(message: impl Into<String>) -> Self {
        ExportError::Failed {
            message: message.into(),
        }
    }
}
