// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Unbuffered processor exporting every ended record on the calling thread.

use crate::async_result::AsyncResult;
use crate::error::ExportError;
use crate::exporter::composite::guarded;
use crate::exporter::Exporter;
use crate::processor::RecordProcessor;
use crate::record::{Batch, Record};
use crate::stats::PipelineStats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exports each ended record as a batch of one.
///
/// Exports are serialized: the caller of `on_end` waits for its own export,
/// up to the export timeout, while holding the exporter. A panicking
/// exporter fails the call instead of unwinding into the caller.
pub struct SimpleProcessor<R> {
    exporter: Mutex<Box<dyn Exporter<R>>>,
    export_timeout: Duration,
    stats: PipelineStats,
    is_shutdown: AtomicBool,
    shutdown_result: Mutex<Option<AsyncResult>>,
}

impl<R: Record> SimpleProcessor<R> {
    /// Creates a processor over `exporter` with a 30 second export timeout.
    pub fn new<E>(exporter: E) -> Self
    where
        E: Exporter<R> + 'static,
    {
        Self {
            exporter: Mutex::new(Box::new(exporter)),
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            stats: PipelineStats::new(),
            is_shutdown: AtomicBool::new(false),
            shutdown_result: Mutex::new(None),
        }
    }

    /// Sets how long `on_end` waits for one export.
    #[must_use]
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Counters of this processor.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

impl<R: Record> RecordProcessor<R> for SimpleProcessor<R> {
    fn on_start(&self, _record: &R) {}

    fn on_end(&self, record: R) {
        if !record.is_ended() {
            return;
        }
        if self.is_shutdown.load(Ordering::Acquire) {
            self.stats.record_dropped(1);
            return;
        }

        let exporter = self.exporter.lock();
        let batch = Batch::new(vec![record]);
        let result = guarded(0, "export", || exporter.export(batch));
        match result.wait_timeout(self.export_timeout) {
            Some(Ok(())) => {
                self.stats.record_exported(1);
                debug!("exported record");
            }
            Some(Err(error)) => {
                self.stats.record_failed(1);
                warn!(%error, "record export failed");
            }
            None => {
                self.stats.record_failed(1);
                warn!(timeout = ?self.export_timeout, "record export timed out");
            }
        }
    }

    fn force_flush(&self) -> AsyncResult {
        if self.is_shutdown.load(Ordering::Acquire) {
            return AsyncResult::failed(ExportError::Shutdown);
        }
        let exporter = self.exporter.lock();
        guarded(0, "flush", || exporter.flush())
    }

    fn shutdown(&self) -> AsyncResult {
        let mut guard = self.shutdown_result.lock();
        if let Some(result) = guard.as_ref() {
            return result.clone();
        }
        self.is_shutdown.store(true, Ordering::Release);
        let exporter = self.exporter.lock();
        let result = guarded(0, "shutdown", || exporter.shutdown());
        *guard = Some(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ExporterBehavior, RecordingExporter, TestRecord};
    use std::sync::Arc;

    fn processor(
        behavior: ExporterBehavior,
    ) -> (SimpleProcessor<TestRecord>, Arc<RecordingExporter>) {
        let exporter = Arc::new(RecordingExporter::with_behavior(behavior));
        (SimpleProcessor::new(exporter.clone()), exporter)
    }

    #[test]
    fn test_each_record_is_its_own_batch() {
        let (processor, exporter) = processor(ExporterBehavior::Succeed);
        processor.on_end(TestRecord::new(1));
        processor.on_end(TestRecord::unended(2));
        processor.on_end(TestRecord::new(3));

        assert_eq!(exporter.batches(), vec![vec![1], vec![3]]);
        assert_eq!(processor.stats().snapshot().exported_batches, 2);
        assert!(processor.force_flush().is_success());
        assert_eq!(exporter.flushes(), 1);
    }

    #[test]
    fn test_failures_and_timeouts_are_counted() {
        let (processor, _exporter) = processor(ExporterBehavior::Fail);
        processor.on_end(TestRecord::new(1));
        assert_eq!(processor.stats().snapshot().failed_records, 1);

        let exporter = Arc::new(RecordingExporter::with_behavior(ExporterBehavior::Pending));
        let processor = SimpleProcessor::new(exporter.clone())
            .with_export_timeout(Duration::from_millis(10));
        processor.on_end(TestRecord::new(1));
        assert_eq!(processor.stats().snapshot().failed_records, 1);
        assert_eq!(exporter.record_count(), 1);
    }

    #[test]
    fn test_panicking_exporter_does_not_reach_caller() {
        let (processor, exporter) = processor(ExporterBehavior::Panic);
        processor.on_end(TestRecord::new(1));
        processor.on_end(TestRecord::new(2));

        let stats = processor.stats().snapshot();
        assert_eq!(stats.failed_records, 2);
        assert_eq!(stats.exported_records, 0);
        assert_eq!(exporter.record_count(), 0);

        let exporter = Arc::new(
            RecordingExporter::new()
                .with_panicking_flush()
                .with_panicking_shutdown(),
        );
        let processor = SimpleProcessor::new(exporter.clone());
        assert!(matches!(
            processor.force_flush().wait(),
            Err(ExportError::ExporterPanicked { index: 0, .. })
        ));
        assert!(matches!(
            processor.shutdown().wait(),
            Err(ExportError::ExporterPanicked { .. })
        ));
        assert_eq!(exporter.shutdowns(), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (processor, exporter) = processor(ExporterBehavior::Succeed);
        for _ in 0..5 {
            assert_eq!(processor.shutdown().wait(), Ok(()));
        }
        assert_eq!(exporter.shutdowns(), 1);

        for id in 1..=10_000 {
            processor.on_end(TestRecord::new(id));
        }
        assert_eq!(exporter.record_count(), 0);
        assert_eq!(processor.stats().dropped_records(), 10_000);
        assert_eq!(
            processor.force_flush().wait(),
            Err(ExportError::Shutdown)
        );
    }
}
