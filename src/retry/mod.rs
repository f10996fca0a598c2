// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Retry with exponential backoff and jitter.
//!
//! A [`RetryingTransport`] runs one logical request through a [`Transport`]:
//!
//! 1. the first attempt runs immediately;
//! 2. success or a non-retryable failure ends the request;
//! 3. a retryable failure at `max_attempts` ends the request;
//! 4. otherwise the transport sleeps a delay drawn uniformly from
//!    `[0, min(max_backoff, initial_backoff * multiplier^(attempt - 1)))`
//!    and tries again;
//! 5. an interrupted sleep ends the request as a failure.

pub mod policy;
pub mod transport;

pub use policy::{RetryPolicy, RetryPolicyConfig};
pub use transport::{
    is_retryable_grpc_code, is_retryable_http_status, Interrupted, InterruptibleSleep, Jitter,
    RandomJitter, RetryingTransport, Sleep, Transport,
};
