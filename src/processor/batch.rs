// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Scheduled-drain batching engine.
//!
//! Producers link ended records into a [`BoundedBuffer`]. A single worker
//! thread owns every export: it wakes up on a fixed schedule, on an explicit
//! flush or shutdown, or early once a full batch is waiting.
//!
//! ```text
//!  on_end ──▶ BoundedBuffer ──(drain, oldest first)──▶ worker ──▶ Exporter
//!                  │                                     ▲
//!                  └──── Wake / Flush / Shutdown ────────┘ (flume)
//! ```
//!
//! At most one export is in flight. The worker waits for each export's
//! [`AsyncResult`] up to `export_timeout` before moving on, so a stuck
//! exporter delays the pipeline but never wedges it.

use crate::async_result::AsyncResult;
use crate::buffer::{BoundedBuffer, InsertError};
use crate::error::{Error, ExportError};
use crate::exporter::composite::guarded;
use crate::exporter::Exporter;
use crate::processor::config::BatchConfig;
use crate::processor::RecordProcessor;
use crate::record::{Batch, Record};
use crate::stats::PipelineStats;
use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

const WORKER_NAME: &str = "batch-processor";

/// Messages from producers and callers to the worker.
enum Control {
    /// A full batch is waiting.
    Wake,
    Flush(AsyncResult),
    Shutdown(AsyncResult),
}

/// State shared by the handle and the worker.
struct Shared<R> {
    buffer: BoundedBuffer<R>,
    exporter: Box<dyn Exporter<R>>,
    config: BatchConfig,
    stats: Arc<PipelineStats>,
    /// Set while a `Wake` sits unread in the control channel.
    wake_pending: AtomicBool,
    drop_logged: AtomicBool,
}

/// Batches ended records and exports them from a background thread.
pub struct BatchProcessor<R: Record> {
    shared: Arc<Shared<R>>,
    control: Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_result: Mutex<Option<AsyncResult>>,
}

impl<R: Record> BatchProcessor<R> {
    /// Validates `config` and starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration and
    /// [`Error::Spawn`] if the worker thread cannot be started.
    pub fn new<E>(exporter: E, config: BatchConfig) -> Result<Self, Error>
    where
        E: Exporter<R> + 'static,
    {
        config.validate()?;
        let shared = Arc::new(Shared {
            buffer: BoundedBuffer::new(config.max_queue_size)?,
            exporter: Box::new(exporter),
            config,
            stats: Arc::new(PipelineStats::new()),
            wake_pending: AtomicBool::new(false),
            drop_logged: AtomicBool::new(false),
        });
        let (control, receiver) = flume::unbounded();

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run_worker(worker_shared, receiver))
            .map_err(|source| Error::Spawn {
                name: WORKER_NAME,
                source,
            })?;

        info!(
            max_queue_size = shared.config.max_queue_size,
            max_export_batch_size = shared.config.max_export_batch_size,
            schedule_delay = ?shared.config.schedule_delay,
            blocking = shared.config.blocking,
            "batch processor started"
        );

        Ok(Self {
            shared,
            control,
            worker: Mutex::new(Some(worker)),
            shutdown_result: Mutex::new(None),
        })
    }

    /// Enqueues a record for export.
    ///
    /// With `blocking` unset, a full buffer drops the record. With it set,
    /// the caller waits for space, up to `enqueue_timeout` when one is
    /// configured, and drops the record once that elapses. Records arriving after shutdown, and
    /// records whose identity is already buffered, are dropped. Every drop
    /// is counted.
    pub fn on_record_ready(&self, record: R) {
        let shared = &self.shared;
        let inserted = if shared.config.blocking {
            shared.buffer.insert_blocking(record, shared.config.enqueue_timeout)
        } else {
            shared.buffer.insert(record)
        };

        match inserted {
            Ok(len) => {
                if len >= shared.config.max_export_batch_size
                    && !shared.wake_pending.swap(true, Ordering::AcqRel)
                    && self.control.send(Control::Wake).is_err()
                {
                    shared.wake_pending.store(false, Ordering::Release);
                }
            }
            Err(InsertError::Full(_)) => {
                shared.stats.record_dropped(1);
                if !shared.drop_logged.swap(true, Ordering::Relaxed) {
                    warn!(
                        max_queue_size = shared.config.max_queue_size,
                        "batch queue full, dropping records"
                    );
                }
            }
            Err(InsertError::AlreadyLinked(record)) => {
                shared.stats.record_dropped(1);
                debug!(record_id = %record.id(), "record already queued, dropping duplicate");
            }
            Err(InsertError::Closed(_)) => {
                shared.stats.record_dropped(1);
            }
        }
    }

    /// Counters of this processor.
    pub fn stats(&self) -> &PipelineStats {
        &self.shared.stats
    }

    /// Number of records waiting for export.
    pub fn queued(&self) -> usize {
        self.shared.buffer.len()
    }

    fn join_worker(&self) {
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("batch processor worker panicked");
            }
        }
    }
}

impl<R: Record> RecordProcessor<R> for BatchProcessor<R> {
    fn on_start(&self, _record: &R) {}

    fn on_end(&self, record: R) {
        if record.is_ended() {
            self.on_record_ready(record);
        } else {
            debug!(record_id = %record.id(), "ignoring record that has not ended");
        }
    }

    fn force_flush(&self) -> AsyncResult {
        // Held across the send so that no flush is queued behind `Shutdown`.
        let shutdown = self.shutdown_result.lock();
        if shutdown.is_some() {
            return AsyncResult::failed(ExportError::Shutdown);
        }
        let result = AsyncResult::pending();
        if self.control.send(Control::Flush(result.clone())).is_err() {
            let _ = result.fail(ExportError::WorkerUnavailable);
        }
        result
    }

    fn shutdown(&self) -> AsyncResult {
        let result = {
            let mut guard = self.shutdown_result.lock();
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            let result = AsyncResult::pending();
            *guard = Some(result.clone());
            result
        };

        self.shared.buffer.close();
        if self.control.send(Control::Shutdown(result.clone())).is_err() {
            let _ = result.fail(ExportError::WorkerUnavailable);
            return result;
        }

        let timeout = self.shared.config.shutdown_timeout;
        match result.wait_timeout(timeout) {
            Some(outcome) => {
                self.join_worker();
                info!(success = outcome.is_ok(), "batch processor shut down");
            }
            None => {
                warn!(?timeout, "batch processor shutdown timed out, cancelling exporter");
                let _ = guarded(0, "cancel", || {
                    self.shared.exporter.cancel();
                    AsyncResult::succeeded()
                });
                let _ = result.fail(ExportError::Timeout { timeout });
                // The worker exits on its own once the exporter lets go.
                drop(self.worker.lock().take());
            }
        }
        result
    }
}

fn run_worker<R: Record>(shared: Arc<Shared<R>>, control: Receiver<Control>) {
    let schedule_delay = shared.config.schedule_delay;
    let mut next_drain = Instant::now() + schedule_delay;
    loop {
        match control.recv_deadline(next_drain) {
            Ok(Control::Wake) => {
                shared.wake_pending.store(false, Ordering::Release);
                shared.export_full_batches();
            }
            Ok(Control::Flush(result)) => {
                shared.export_queued();
                guarded(0, "flush", || shared.exporter.flush()).forward_to(&result);
            }
            Ok(Control::Shutdown(result)) => {
                shared.export_queued();
                guarded(0, "shutdown", || shared.exporter.shutdown()).forward_to(&result);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                shared.export_queued();
                next_drain = Instant::now() + schedule_delay;
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Handle dropped without an explicit shutdown.
                shared.buffer.close();
                shared.export_queued();
                let _ = guarded(0, "shutdown", || shared.exporter.shutdown())
                    .wait_timeout(shared.config.shutdown_timeout);
                return;
            }
        }
    }
}

impl<R: Record> Shared<R> {
    /// Exports batches of exactly `max_export_batch_size` while enough
    /// records are buffered.
    fn export_full_batches(&self) {
        let batch_size = self.config.max_export_batch_size;
        while self.buffer.len() >= batch_size {
            let records = self.buffer.drain_up_to(batch_size);
            if records.is_empty() {
                break;
            }
            self.export(records);
        }
    }

    /// Exports every record buffered when the drain starts.
    fn export_queued(&self) {
        let mut budget = self.buffer.len();
        while budget > 0 {
            let records = self
                .buffer
                .drain_up_to(budget.min(self.config.max_export_batch_size));
            if records.is_empty() {
                break;
            }
            budget -= records.len();
            self.export(records);
        }
    }

    fn export(&self, records: Vec<R>) {
        let count = records.len();
        let batch = Batch::new(records);
        let result = guarded(0, "export", || self.exporter.export(batch));

        let timeout = self.config.export_timeout;
        match result.wait_timeout(timeout) {
            Some(Ok(())) => {
                self.stats.record_exported(count);
                debug!(records = count, "exported batch");
            }
            Some(Err(error)) => {
                self.stats.record_failed(count);
                warn!(records = count, %error, "batch export failed");
            }
            None => {
                self.stats.record_failed(count);
                warn!(records = count, ?timeout, "batch export timed out");
            }
        }
    }
}
