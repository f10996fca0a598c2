// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Retrying wrapper around a single send operation.
//!
//! The transport itself is protocol agnostic: the caller decides which
//! failures are worth another attempt. Both the sleep used between attempts
//! and the jitter source are replaceable.

use crate::error::ExportError;
use crate::retry::policy::RetryPolicy;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Something that can ship an encoded payload somewhere.
pub trait Transport: Send + Sync {
    /// Transport-level error, e.g. a status code.
    type Error: fmt::Display;

    /// Sends the payload once.
    fn send(&self, payload: &Bytes) -> Result<(), Self::Error>;
}

/// Returned by [`Sleep::sleep`] when the sleep was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Blocking sleep used between attempts.
pub trait Sleep: Send + Sync {
    /// Sleeps for `duration`, or fails if interrupted.
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted>;

    /// Cuts short any current and future sleep.
    fn interrupt(&self) {}
}

/// Thread sleep that can be interrupted from another thread.
///
/// Interruption is latched: once interrupted, every later sleep fails
/// immediately until [`reset`](Self::reset) is called.
#[derive(Debug, Default)]
pub struct InterruptibleSleep {
    interrupted: Mutex<bool>,
    wake: Condvar,
}

impl InterruptibleSleep {
    /// Creates a sleep that is not interrupted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears a previous interruption.
    pub fn reset(&self) {
        *self.interrupted.lock() = false;
    }
}

impl Sleep for InterruptibleSleep {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        let mut interrupted = self.interrupted.lock();
        loop {
            if *interrupted {
                return Err(Interrupted);
            }
            if self.wake.wait_until(&mut interrupted, deadline).timed_out() {
                return if *interrupted { Err(Interrupted) } else { Ok(()) };
            }
        }
    }

    fn interrupt(&self) {
        *self.interrupted.lock() = true;
        let _ = self.wake.notify_all();
    }
}

/// Source of randomness spreading retries out in time.
pub trait Jitter: Send + Sync {
    /// Returns a delay in `[0, upper)`; zero when `upper` is zero.
    fn sample(&self, upper: Duration) -> Duration;
}

/// Uniform jitter backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self, upper: Duration) -> Duration {
        let nanos = u64::try_from(upper.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..nanos))
    }
}

type RetryPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Wraps a [`Transport`] with bounded exponential backoff and jitter.
pub struct RetryingTransport<T: Transport> {
    transport: T,
    policy: RetryPolicy,
    is_retryable: RetryPredicate<T::Error>,
    sleep: Arc<dyn Sleep>,
    jitter: Arc<dyn Jitter>,
}

impl<T: Transport> RetryingTransport<T> {
    /// Creates a retrying transport.
    ///
    /// `is_retryable` classifies transport errors: `true` means the same
    /// request may succeed if sent again.
    pub fn new<F>(transport: T, policy: RetryPolicy, is_retryable: F) -> Self
    where
        F: Fn(&T::Error) -> bool + Send + Sync + 'static,
    {
        Self {
            transport,
            policy,
            is_retryable: Box::new(is_retryable),
            sleep: Arc::new(InterruptibleSleep::new()),
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Replaces the sleep used between attempts.
    #[must_use]
    pub fn with_sleep(mut self, sleep: Arc<dyn Sleep>) -> Self {
        self.sleep = sleep;
        self
    }

    /// Replaces the jitter source.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// The policy bounding this transport.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.transport
    }

    /// Sends `payload`, retrying retryable failures.
    ///
    /// Blocks the calling thread for the duration of all backoff sleeps.
    ///
    /// # Errors
    ///
    /// - `NonRetryable` as soon as the transport returns a non-retryable error.
    /// - `RetriesExhausted` once `max_attempts` retryable failures occurred.
    /// - `Interrupted` if a backoff sleep was interrupted; no further attempt
    ///   is made.
    pub fn send(&self, payload: &Bytes) -> Result<(), ExportError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;
        loop {
            let error = match self.transport.send(payload) {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(attempt, "transport send succeeded after retry");
                    }
                    return Ok(());
                }
                Err(error) => error,
            };

            if !(self.is_retryable)(&error) {
                warn!(attempt, error = %error, "non-retryable transport failure");
                return Err(ExportError::NonRetryable {
                    attempt,
                    message: error.to_string(),
                });
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "transport retries exhausted");
                return Err(ExportError::RetriesExhausted {
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            let backoff = self.policy.backoff_for(attempt);
            let delay = self.jitter.sample(backoff);
            debug!(
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retryable transport failure, backing off"
            );
            if self.sleep.sleep(delay).is_err() {
                debug!(attempts = attempt, "retry backoff interrupted");
                return Err(ExportError::Interrupted { attempts: attempt });
            }
            attempt += 1;
        }
    }

    /// Interrupts a sleeping backoff; the pending send fails with
    /// `ExportError::Interrupted`.
    pub fn interrupt(&self) {
        self.sleep.interrupt();
    }
}

/// HTTP status codes worth retrying: 429, 502, 503 and 504.
pub fn is_retryable_http_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// gRPC status codes worth retrying: CANCELLED, DEADLINE_EXCEEDED,
/// RESOURCE_EXHAUSTED, ABORTED, OUT_OF_RANGE, UNAVAILABLE and DATA_LOSS.
pub fn is_retryable_grpc_code(code: i32) -> bool {
    matches!(code, 1 | 4 | 8 | 10 | 11 | 14 | 15)
}
