// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Batching engines.
//!
//! A [`RecordProcessor`] sees every record twice: when it starts and when it
//! ends. Ended records are handed to the engine, which groups them into
//! batches and feeds an [`Exporter`](crate::Exporter).
//!
//! Three engines are provided:
//!
//! - [`BatchProcessor`]: a bounded buffer drained on a schedule by one worker
//!   thread, with an early drain once a full batch is available.
//! - [`RingProcessor`]: a bounded single-consumer ring in front of another
//!   processor, preserving strict publish order.
//! - [`SimpleProcessor`]: exports every ended record on the calling thread.
//!
//! Every engine shares the same lifecycle rules. `shutdown` runs its
//! terminal path once and hands the same result to every caller. Records
//! arriving after shutdown are discarded and counted as dropped.

use crate::async_result::AsyncResult;
use std::sync::Arc;

pub mod batch;
pub mod config;
pub mod ring;
pub mod simple;

pub use batch::BatchProcessor;
pub use config::{BatchConfig, RingConfig, WaitStrategy};
pub use ring::RingProcessor;
pub use simple::SimpleProcessor;

/// Lifecycle hooks of a record pipeline stage.
pub trait RecordProcessor<R>: Send + Sync {
    /// Called when a record starts.
    fn on_start(&self, record: &R);

    /// Called when a record ends. Ownership moves into the processor.
    fn on_end(&self, record: R);

    /// Exports everything received so far.
    fn force_flush(&self) -> AsyncResult;

    /// Flushes and releases resources. Idempotent.
    fn shutdown(&self) -> AsyncResult;
}

impl<R, P> RecordProcessor<R> for Arc<P>
where
    P: RecordProcessor<R> + ?Sized,
{
    fn on_start(&self, record: &R) {
        (**self).on_start(record)
    }

    fn on_end(&self, record: R) {
        (**self).on_end(record)
    }

    fn force_flush(&self) -> AsyncResult {
        (**self).force_flush()
    }

    fn shutdown(&self) -> AsyncResult {
        (**self).shutdown()
    }
}
