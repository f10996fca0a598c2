// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Test doubles shared by the unit tests.

use crate::async_result::AsyncResult;
use crate::error::{ExportError, ExportResult};
use crate::exporter::Exporter;
use crate::processor::RecordProcessor;
use crate::record::{Batch, Record, RecordId};
use crate::retry::{Interrupted, Jitter, Sleep, Transport};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestRecord {
    pub id: RecordId,
    pub ended: bool,
}

impl TestRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id: RecordId(id),
            ended: true,
        }
    }

    pub fn unended(id: u64) -> Self {
        Self {
            id: RecordId(id),
            ended: false,
        }
    }
}

impl Record for TestRecord {
    fn id(&self) -> RecordId {
        self.id
    }

    fn is_ended(&self) -> bool {
        self.ended
    }
}

/// A batch of records with ids `1..=n`.
pub(crate) fn test_batch(n: u64) -> Batch<TestRecord> {
    Batch::new((1..=n).map(TestRecord::new).collect())
}

pub(crate) fn ids_of(batch: &Batch<TestRecord>) -> Vec<u64> {
    batch.iter().map(|r| r.id.as_u64()).collect()
}

/// Polls `condition` until it holds or five seconds elapse.
pub(crate) fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ExporterBehavior {
    Succeed,
    Fail,
    Panic,
    /// Leaves results pending until `complete_pending`.
    Pending,
}

/// Exporter remembering the ids of every batch it saw.
pub(crate) struct RecordingExporter {
    behavior: Mutex<ExporterBehavior>,
    batches: Mutex<Vec<Vec<u64>>>,
    pending: Mutex<Vec<AsyncResult>>,
    flushes: AtomicUsize,
    shutdowns: AtomicUsize,
    panicking_flush: bool,
    panicking_shutdown: bool,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::with_behavior(ExporterBehavior::Succeed)
    }

    pub fn with_behavior(behavior: ExporterBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            batches: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            panicking_flush: false,
            panicking_shutdown: false,
        }
    }

    /// Panics in `flush` after counting the call.
    pub fn with_panicking_flush(mut self) -> Self {
        self.panicking_flush = true;
        self
    }

    /// Panics in `shutdown` after counting the call.
    pub fn with_panicking_shutdown(mut self) -> Self {
        self.panicking_shutdown = true;
        self
    }

    pub fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.lock().clone()
    }

    pub fn record_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn complete_pending(&self, result: ExportResult) {
        for pending in self.pending.lock().drain(..) {
            let _ = pending.complete(result.clone());
        }
    }

    /// Succeeds every pending export and every later one.
    pub fn release(&self) {
        let mut behavior = self.behavior.lock();
        *behavior = ExporterBehavior::Succeed;
        self.complete_pending(Ok(()));
    }
}

impl Exporter<TestRecord> for RecordingExporter {
    fn export(&self, batch: Batch<TestRecord>) -> AsyncResult {
        let behavior = self.behavior.lock();
        let result = match *behavior {
            ExporterBehavior::Panic => panic!("exporter exploded"),
            ExporterBehavior::Succeed => AsyncResult::succeeded(),
            ExporterBehavior::Fail => AsyncResult::failed(ExportError::failed("collector down")),
            ExporterBehavior::Pending => {
                let result = AsyncResult::pending();
                self.pending.lock().push(result.clone());
                result
            }
        };
        drop(behavior);
        // Recorded last so that a visible batch implies a registered result.
        self.batches.lock().push(ids_of(&batch));
        result
    }

    fn flush(&self) -> AsyncResult {
        let _ = self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.panicking_flush {
            panic!("flush exploded");
        }
        AsyncResult::succeeded()
    }

    fn shutdown(&self) -> AsyncResult {
        let _ = self.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.panicking_shutdown {
            panic!("shutdown exploded");
        }
        AsyncResult::succeeded()
    }

    fn cancel(&self) {
        self.complete_pending(Err(ExportError::Interrupted { attempts: 0 }));
    }
}

/// Lifecycle event observed by a [`RecordingProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observed {
    Start(u64),
    End(u64),
    Flush,
    Shutdown,
}

/// Processor remembering every lifecycle call, in order.
#[derive(Default)]
pub(crate) struct RecordingProcessor {
    events: Mutex<Vec<Observed>>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }
}

impl RecordProcessor<TestRecord> for RecordingProcessor {
    fn on_start(&self, record: &TestRecord) {
        self.events.lock().push(Observed::Start(record.id.as_u64()));
    }

    fn on_end(&self, record: TestRecord) {
        self.events.lock().push(Observed::End(record.id.as_u64()));
    }

    fn force_flush(&self) -> AsyncResult {
        self.events.lock().push(Observed::Flush);
        AsyncResult::succeeded()
    }

    fn shutdown(&self) -> AsyncResult {
        self.events.lock().push(Observed::Shutdown);
        AsyncResult::succeeded()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TransportFailure {
    pub status: u16,
    pub retryable: bool,
}

impl TransportFailure {
    pub fn retryable(status: u16) -> Self {
        Self {
            status,
            retryable: true,
        }
    }

    pub fn permanent(status: u16) -> Self {
        Self {
            status,
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}", self.status)
    }
}

/// Transport replaying a scripted list of outcomes, then failing with a
/// retryable 503 once the script runs out.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), TransportFailure>>>,
    payloads: Mutex<Vec<Bytes>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<(), TransportFailure>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        self.payloads.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    type Error = TransportFailure;

    fn send(&self, payload: &Bytes) -> Result<(), TransportFailure> {
        self.payloads.lock().push(payload.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Err(TransportFailure::retryable(503)))
    }
}

/// Sleep that returns immediately and remembers what it was asked to do.
pub(crate) struct RecordingSleep {
    sleeps: Mutex<Vec<Duration>>,
    interrupt_on: Option<usize>,
}

impl RecordingSleep {
    pub fn new() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            interrupt_on: None,
        }
    }

    /// Interrupts the `n`th sleep (1-based).
    pub fn interrupted_on(n: usize) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            interrupt_on: Some(n),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let mut sleeps = self.sleeps.lock();
        sleeps.push(duration);
        if Some(sleeps.len()) == self.interrupt_on {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Deterministic jitter returning a fixed fraction of the bound.
pub(crate) struct FixedJitter {
    fraction: f64,
    bounds: Mutex<Vec<Duration>>,
}

impl FixedJitter {
    pub fn half() -> Self {
        Self {
            fraction: 0.5,
            bounds: Mutex::new(Vec::new()),
        }
    }

    pub fn full() -> Self {
        Self {
            fraction: 1.0,
            bounds: Mutex::new(Vec::new()),
        }
    }

    /// Every backoff bound the jitter was sampled against.
    pub fn bounds(&self) -> Vec<Duration> {
        self.bounds.lock().clone()
    }
}

impl Jitter for FixedJitter {
    fn sample(&self, upper: Duration) -> Duration {
        self.bounds.lock().push(upper);
        upper.mul_f64(self.fraction)
    }
}
