// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline tests.

use bytes::Bytes;
use otap_df_batch::retry::{is_retryable_http_status, Jitter};
use otap_df_batch::{
    AsyncResult, Batch, BatchConfig, BatchProcessor, CompositeExporter, ExportError, Exporter,
    Record, RecordId, RecordIdGenerator, RecordProcessor, RetryPolicy, RetryingTransport,
    RingConfig, RingProcessor, Transport, TransportExporter, WaitStrategy,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Span {
    id: RecordId,
}

impl Span {
    fn new(ids: &RecordIdGenerator) -> Self {
        Self { id: ids.next_id() }
    }
}

impl Record for Span {
    fn id(&self) -> RecordId {
        self.id
    }
}

/// Remembers the ids of every exported batch.
#[derive(Default)]
struct CollectingExporter {
    batches: Mutex<Vec<Vec<u64>>>,
    shutdowns: AtomicUsize,
}

impl CollectingExporter {
    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    fn exported(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }

    fn ids(&self) -> Vec<u64> {
        self.batches.lock().iter().flatten().copied().collect()
    }
}

impl Exporter<Span> for CollectingExporter {
    fn export(&self, batch: Batch<Span>) -> AsyncResult {
        self.batches
            .lock()
            .push(batch.iter().map(|span| span.id.as_u64()).collect());
        AsyncResult::succeeded()
    }

    fn shutdown(&self) -> AsyncResult {
        let _ = self.shutdowns.fetch_add(1, Ordering::SeqCst);
        AsyncResult::succeeded()
    }
}

/// Fails with HTTP 503 for the first `failures` calls.
struct FlakyCollector {
    failures: usize,
    calls: AtomicUsize,
}

impl Transport for FlakyCollector {
    type Error = u16;

    fn send(&self, _payload: &Bytes) -> Result<(), u16> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(503)
        } else {
            Ok(())
        }
    }
}

/// Always sleeps the whole backoff.
struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self, upper: Duration) -> Duration {
        upper
    }
}

fn encode_count(batch: &Batch<Span>) -> Result<Bytes, ExportError> {
    Ok(Bytes::from(batch.len().to_string()))
}

fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn ten_thousand_records_form_ten_batches() {
    let exporter = Arc::new(CollectingExporter::default());
    let config = BatchConfig::default()
        .with_max_queue_size(10_000)
        .with_max_export_batch_size(1024)
        .with_schedule_delay(Duration::from_secs(1));
    let processor = BatchProcessor::new(exporter.clone(), config).unwrap();

    let ids = RecordIdGenerator::new();
    for _ in 0..10_000 {
        processor.on_end(Span::new(&ids));
    }

    assert!(eventually(Duration::from_secs(10), || {
        exporter.exported() == 10_000
    }));
    let sizes = exporter.batch_sizes();
    assert_eq!(sizes.len(), 10);
    assert!(sizes[..9].iter().all(|size| *size == 1024));
    assert_eq!(sizes[9], 784);
    assert_eq!(exporter.ids(), (1..=10_000).collect::<Vec<u64>>());
    assert_eq!(processor.stats().dropped_records(), 0);

    assert!(processor.shutdown().is_success());
    assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn composite_fans_out_through_retrying_transport() {
    let collector = FlakyCollector {
        failures: 2,
        calls: AtomicUsize::new(0),
    };
    let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2), 2.0)
        .unwrap();
    let transport: Arc<TransportExporter<Span, _, _>> = Arc::new(TransportExporter::new(
        encode_count,
        RetryingTransport::new(collector, policy, |status: &u16| {
            is_retryable_http_status(*status)
        }),
    ));
    let collecting = Arc::new(CollectingExporter::default());
    let composite = CompositeExporter::new(vec![
        transport.clone() as Arc<dyn Exporter<Span>>,
        collecting.clone() as Arc<dyn Exporter<Span>>,
    ]);

    let processor = BatchProcessor::new(composite, BatchConfig::default()).unwrap();
    let ids = RecordIdGenerator::new();
    for _ in 0..5 {
        processor.on_end(Span::new(&ids));
    }
    assert_eq!(processor.force_flush().wait(), Ok(()));

    assert_eq!(collecting.ids(), vec![1, 2, 3, 4, 5]);
    assert_eq!(transport.transport().inner().calls.load(Ordering::SeqCst), 3);
    let stats = processor.stats().snapshot();
    assert_eq!(stats.exported_records, 5);
    assert_eq!(stats.failed_batches, 0);

    assert!(processor.shutdown().is_success());
    assert_eq!(collecting.shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_deadline_interrupts_retry_backoff() {
    let collector = FlakyCollector {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
    };
    let transport = RetryingTransport::new(collector, RetryPolicy::default(), |status: &u16| {
        is_retryable_http_status(*status)
    })
    .with_jitter(Arc::new(NoJitter));
    let exporter: TransportExporter<Span, _, _> = TransportExporter::new(encode_count, transport);

    let config = BatchConfig::default().with_shutdown_timeout(Duration::from_millis(100));
    let processor = BatchProcessor::new(exporter, config).unwrap();
    processor.on_end(Span::new(&RecordIdGenerator::new()));

    let started = Instant::now();
    assert_eq!(
        processor.shutdown().wait(),
        Err(ExportError::Timeout {
            timeout: Duration::from_millis(100)
        })
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(eventually(Duration::from_secs(5), || {
        processor.stats().snapshot().failed_batches == 1
    }));
}

#[test]
fn ring_serializes_into_batch_processor() {
    let exporter = Arc::new(CollectingExporter::default());
    let batch = BatchProcessor::new(
        exporter.clone(),
        BatchConfig::default().with_max_export_batch_size(16),
    )
    .unwrap();
    let ring = RingProcessor::new(
        batch,
        RingConfig::default()
            .with_buffer_size(256)
            .with_wait_strategy(WaitStrategy::Yielding { spin_tries: 100 }),
    )
    .unwrap();

    let ids = RecordIdGenerator::new();
    for _ in 0..100 {
        let span = Span::new(&ids);
        ring.on_start(&span);
        ring.on_end(span);
    }
    assert_eq!(ring.force_flush().wait(), Ok(()));
    assert_eq!(exporter.ids(), (1..=100).collect::<Vec<u64>>());
    assert!(exporter.batch_sizes().iter().all(|size| *size <= 16));

    for _ in 0..5 {
        assert_eq!(ring.shutdown().wait(), Ok(()));
    }
    assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn flush_result_can_be_awaited() {
    let exporter = Arc::new(CollectingExporter::default());
    let processor = BatchProcessor::new(exporter.clone(), BatchConfig::default()).unwrap();
    let ids = RecordIdGenerator::new();
    for _ in 0..3 {
        processor.on_end(Span::new(&ids));
    }

    assert_eq!(processor.force_flush().await, Ok(()));
    assert_eq!(exporter.exported(), 3);
    assert_eq!(processor.shutdown().await, Ok(()));
}
