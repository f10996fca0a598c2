// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Exporter that encodes batches and ships them through a retrying transport.

use crate::async_result::AsyncResult;
use crate::error::ExportError;
use crate::exporter::Exporter;
use crate::record::Batch;
use crate::retry::{RetryingTransport, Transport};
use bytes::Bytes;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Serializes a batch into the payload handed to the transport.
pub trait BatchEncoder<R>: Send + Sync {
    /// Encodes `batch`.
    fn encode(&self, batch: &Batch<R>) -> Result<Bytes, ExportError>;
}

impl<R, F> BatchEncoder<R> for F
where
    F: Fn(&Batch<R>) -> Result<Bytes, ExportError> + Send + Sync,
{
    fn encode(&self, batch: &Batch<R>) -> Result<Bytes, ExportError> {
        self(batch)
    }
}

/// Encodes each batch and sends it with retries.
///
/// `export` runs on the calling thread, backoff sleeps included, and
/// returns an already completed result.
pub struct TransportExporter<R, E, T: Transport> {
    encoder: E,
    transport: RetryingTransport<T>,
    is_shutdown: AtomicBool,
    _records: PhantomData<fn(R)>,
}

impl<R, E, T> TransportExporter<R, E, T>
where
    E: BatchEncoder<R>,
    T: Transport,
{
    /// Creates an exporter from an encoder and a retrying transport.
    pub fn new(encoder: E, transport: RetryingTransport<T>) -> Self {
        Self {
            encoder,
            transport,
            is_shutdown: AtomicBool::new(false),
            _records: PhantomData,
        }
    }

    /// The retrying transport.
    pub fn transport(&self) -> &RetryingTransport<T> {
        &self.transport
    }
}

impl<R, E, T> Exporter<R> for TransportExporter<R, E, T>
where
    E: BatchEncoder<R>,
    T: Transport,
{
    fn export(&self, batch: Batch<R>) -> AsyncResult {
        if self.is_shutdown.load(Ordering::Acquire) {
            return AsyncResult::failed(ExportError::Shutdown);
        }
        let payload = match self.encoder.encode(&batch) {
            Ok(payload) => payload,
            Err(error) => return AsyncResult::failed(error),
        };
        debug!(
            records = batch.len(),
            bytes = payload.len(),
            "sending encoded batch"
        );
        AsyncResult::from_result(self.transport.send(&payload))
    }

    fn shutdown(&self) -> AsyncResult {
        if !self.is_shutdown.swap(true, Ordering::AcqRel) {
            info!("transport exporter shut down");
            self.transport.interrupt();
        }
        AsyncResult::succeeded()
    }

    fn cancel(&self) {
        self.transport.interrupt();
    }
}
