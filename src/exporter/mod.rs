// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Exporter boundary.
//!
//! An exporter turns a [`Batch`] into a transmission. Batching engines call
//! [`Exporter::export`] for one batch at a time and wait on the returned
//! [`AsyncResult`] with their own timeout, so an exporter that cannot finish
//! should fail its result rather than leave it pending forever.
//!
//! ```text
//!  BatchProcessor ──▶ CompositeExporter ──┬──▶ TransportExporter ──▶ RetryingTransport ──▶ Transport
//!                                         └──▶ any other Exporter
//! ```

use crate::async_result::AsyncResult;
use crate::record::Batch;
use std::sync::Arc;

pub mod composite;
pub mod transport;

pub use composite::CompositeExporter;
pub use transport::{BatchEncoder, TransportExporter};

/// A sink for batches of records.
pub trait Exporter<R>: Send + Sync {
    /// Exports one batch.
    fn export(&self, batch: Batch<R>) -> AsyncResult;

    /// Completes once everything handed to `export` so far is done.
    fn flush(&self) -> AsyncResult {
        AsyncResult::succeeded()
    }

    /// Releases resources. Later exports should fail.
    fn shutdown(&self) -> AsyncResult {
        AsyncResult::succeeded()
    }

    /// Aborts in-progress work, such as a sleeping retry backoff.
    ///
    /// Called when a shutdown deadline elapses.
    fn cancel(&self) {}
}

impl<R, E> Exporter<R> for Arc<E>
where
    E: Exporter<R> + ?Sized,
{
    fn export(&self, batch: Batch<R>) -> AsyncResult {
        (**self).export(batch)
    }

    fn flush(&self) -> AsyncResult {
        (**self).flush()
    }

    fn shutdown(&self) -> AsyncResult {
        (**self).shutdown()
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}
