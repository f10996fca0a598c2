// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of one batch to several exporters.

use crate::async_result::AsyncResult;
use crate::error::ExportError;
use crate::exporter::Exporter;
use crate::record::Batch;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Forwards every batch to a fixed, ordered list of delegate exporters.
///
/// Every delegate is invoked even if an earlier one fails or panics. A
/// panicking delegate only fails its own share of the aggregate result.
/// The aggregate succeeds iff every delegate succeeds, and completes once
/// every delegate has completed.
pub struct CompositeExporter<R> {
    delegates: Vec<Arc<dyn Exporter<R>>>,
}

impl<R> CompositeExporter<R> {
    /// Creates a composite over `delegates`. An empty list is valid.
    pub fn new(delegates: Vec<Arc<dyn Exporter<R>>>) -> Self {
        Self { delegates }
    }

    /// Number of delegates.
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// Returns true if there is no delegate.
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }

    fn fan_out<F>(&self, operation: &'static str, call: F) -> AsyncResult
    where
        F: Fn(&dyn Exporter<R>) -> AsyncResult,
    {
        let results: Vec<AsyncResult> = self
            .delegates
            .iter()
            .enumerate()
            .map(|(index, delegate)| guarded(index, operation, || call(delegate.as_ref())))
            .collect();
        AsyncResult::join(results)
    }
}

impl<R: Send + Sync + 'static> Exporter<R> for CompositeExporter<R> {
    fn export(&self, batch: Batch<R>) -> AsyncResult {
        self.fan_out("export", |delegate| delegate.export(batch.clone()))
    }

    fn flush(&self) -> AsyncResult {
        self.fan_out("flush", |delegate| delegate.flush())
    }

    fn shutdown(&self) -> AsyncResult {
        self.fan_out("shutdown", |delegate| delegate.shutdown())
    }

    fn cancel(&self) {
        for delegate in &self.delegates {
            delegate.cancel();
        }
    }
}

/// Runs one exporter call, turning a panic into a failed result.
pub(crate) fn guarded<F>(index: usize, operation: &'static str, call: F) -> AsyncResult
where
    F: FnOnce() -> AsyncResult,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(index, operation, message = %message, "exporter panicked");
            AsyncResult::failed(ExportError::ExporterPanicked { index, message })
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
