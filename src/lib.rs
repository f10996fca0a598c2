// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded buffering, batching and retrying export for telemetry records.
//!
//! Ended records flow from application threads into a batching engine,
//! which groups them into immutable [`Batch`]es and hands them to an
//! [`Exporter`]. Exporters may fan out through a [`CompositeExporter`] and
//! ship encoded payloads through a [`RetryingTransport`] with bounded,
//! jittered exponential backoff. Every asynchronous step reports back
//! through an [`AsyncResult`].
//!
//! ```text
//!  app threads ──▶ RecordProcessor ──▶ BoundedBuffer ──▶ worker ──▶ Exporter(s) ──▶ RetryingTransport
//!                                                          ▲                │
//!                                                          └── AsyncResult ◀┘
//! ```

pub mod async_result;
pub mod buffer;
pub mod error;
pub mod exporter;
pub mod processor;
pub mod record;
pub mod retry;
pub mod stats;

#[cfg(test)]
mod testing;

pub use async_result::AsyncResult;
pub use buffer::{BoundedBuffer, InsertError};
pub use error::{ConfigError, Error, ExportError, ExportResult};
pub use exporter::{BatchEncoder, CompositeExporter, Exporter, TransportExporter};
pub use processor::{
    BatchConfig, BatchProcessor, RecordProcessor, RingConfig, RingProcessor, SimpleProcessor,
    WaitStrategy,
};
pub use record::{Batch, Record, RecordId, RecordIdGenerator};
pub use retry::{RetryPolicy, RetryingTransport, Transport};
pub use stats::{PipelineStats, StatsSnapshot};
