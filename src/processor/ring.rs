// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Single-consumer ring in front of another processor.
//!
//! Producers publish lifecycle events into a bounded channel and return
//! immediately. One consumer thread replays them, in publish order, against
//! the wrapped [`RecordProcessor`], so the wrapped processor never sees
//! concurrent calls.

use crate::async_result::AsyncResult;
use crate::error::{Error, ExportError};
use crate::processor::config::{RingConfig, WaitStrategy};
use crate::processor::RecordProcessor;
use crate::record::Record;
use crate::stats::PipelineStats;
use flume::{Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{info, warn};

const CONSUMER_NAME: &str = "ring-processor";

enum RingEvent<R> {
    Start(R),
    End(R),
    Flush(AsyncResult),
    Shutdown(AsyncResult),
}

/// Serializes lifecycle calls from any number of producers onto one
/// consumer thread.
///
/// `on_start` publishes a clone of the record, which is why records must be
/// `Clone`. With `blocking` unset, an event that finds the ring full is
/// rejected; rejected and post-shutdown `End` events count as dropped
/// records.
pub struct RingProcessor<R> {
    producer: Sender<RingEvent<R>>,
    config: RingConfig,
    stats: Arc<PipelineStats>,
    /// Producers between their shutdown check and the end of their send.
    publishing: Arc<AtomicUsize>,
    is_shutdown: AtomicBool,
    drop_logged: AtomicBool,
    shutdown_result: Mutex<Option<AsyncResult>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Record + Clone> RingProcessor<R> {
    /// Validates `config` and starts the consumer thread over `inner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration and
    /// [`Error::Spawn`] if the consumer thread cannot be started.
    pub fn new<P>(inner: P, config: RingConfig) -> Result<Self, Error>
    where
        P: RecordProcessor<R> + 'static,
    {
        config.validate()?;
        let (producer, events) = flume::bounded(config.buffer_size);
        let stats = Arc::new(PipelineStats::new());
        let publishing = Arc::new(AtomicUsize::new(0));
        let late = LateEvents {
            publishing: publishing.clone(),
            stats: stats.clone(),
        };
        let strategy = config.wait_strategy;
        let consumer = thread::Builder::new()
            .name(CONSUMER_NAME.to_string())
            .spawn(move || run_consumer(inner, events, strategy, late))
            .map_err(|source| Error::Spawn {
                name: CONSUMER_NAME,
                source,
            })?;

        info!(
            buffer_size = config.buffer_size,
            blocking = config.blocking,
            wait_strategy = ?config.wait_strategy,
            "ring processor started"
        );

        Ok(Self {
            producer,
            config,
            stats,
            publishing,
            is_shutdown: AtomicBool::new(false),
            drop_logged: AtomicBool::new(false),
            shutdown_result: Mutex::new(None),
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// Counters of this processor.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    fn publish(&self, event: RingEvent<R>) {
        let counts = matches!(event, RingEvent::End(_));
        let _publishing = Publishing::enter(&self.publishing);
        if self.is_shutdown.load(Ordering::SeqCst) {
            if counts {
                self.stats.record_dropped(1);
            }
            return;
        }

        let published = if self.config.blocking {
            self.producer.send(event).is_ok()
        } else {
            match self.producer.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    if !self.drop_logged.swap(true, Ordering::Relaxed) {
                        warn!(
                            buffer_size = self.config.buffer_size,
                            "ring full, rejecting events"
                        );
                    }
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        };
        if !published && counts {
            self.stats.record_dropped(1);
        }
    }

    fn join_consumer(&self) {
        if let Some(consumer) = self.consumer.lock().take() {
            if consumer.join().is_err() {
                warn!("ring processor consumer panicked");
            }
        }
    }
}

impl<R: Record + Clone> RecordProcessor<R> for RingProcessor<R> {
    fn on_start(&self, record: &R) {
        self.publish(RingEvent::Start(record.clone()));
    }

    fn on_end(&self, record: R) {
        self.publish(RingEvent::End(record));
    }

    fn force_flush(&self) -> AsyncResult {
        let _publishing = Publishing::enter(&self.publishing);
        if self.is_shutdown.load(Ordering::SeqCst) {
            return AsyncResult::failed(ExportError::Shutdown);
        }
        let result = AsyncResult::pending();
        if self.producer.send(RingEvent::Flush(result.clone())).is_err() {
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
        self.is_shutdown.store(true, Ordering::SeqCst);

        let timeout = self.config.shutdown_timeout;
        let deadline = Instant::now() + timeout;
        match self
            .producer
            .send_deadline(RingEvent::Shutdown(result.clone()), deadline)
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(?timeout, "ring stayed full during shutdown");
                let _ = result.fail(ExportError::Timeout { timeout });
                return result;
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                let _ = result.fail(ExportError::WorkerUnavailable);
                return result;
            }
        }

        match result.wait_timeout(deadline.saturating_duration_since(Instant::now())) {
            Some(outcome) => {
                self.join_consumer();
                info!(success = outcome.is_ok(), "ring processor shut down");
            }
            None => {
                warn!(?timeout, "ring processor shutdown timed out");
                let _ = result.fail(ExportError::Timeout { timeout });
                drop(self.consumer.lock().take());
            }
        }
        result
    }
}

/// Marks a producer as publishing for as long as it is alive.
struct Publishing<'a>(&'a AtomicUsize);

impl<'a> Publishing<'a> {
    fn enter(publishing: &'a AtomicUsize) -> Self {
        let _ = publishing.fetch_add(1, Ordering::SeqCst);
        Self(publishing)
    }
}

impl Drop for Publishing<'_> {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Consumer-side view of producers racing a shutdown.
struct LateEvents {
    publishing: Arc<AtomicUsize>,
    stats: Arc<PipelineStats>,
}

impl LateEvents {
    /// Discards every event published behind `Shutdown`.
    ///
    /// Returns once no producer is publishing and the ring is empty. A
    /// producer arriving later observes the shutdown flag and never sends.
    fn discard<R>(&self, events: &Receiver<RingEvent<R>>) {
        loop {
            let quiet = self.publishing.load(Ordering::SeqCst) == 0;
            for event in events.try_iter() {
                match event {
                    RingEvent::End(_) => self.stats.record_dropped(1),
                    RingEvent::Flush(result) => {
                        let _ = result.fail(ExportError::Shutdown);
                    }
                    RingEvent::Start(_) | RingEvent::Shutdown(_) => {}
                }
            }
            if quiet {
                return;
            }
            thread::yield_now();
        }
    }
}

/// Consumer-side idling between empty polls.
struct Idle {
    strategy: WaitStrategy,
    misses: u32,
}

impl Idle {
    fn new(strategy: WaitStrategy) -> Self {
        Self {
            strategy,
            misses: 0,
        }
    }

    fn reset(&mut self) {
        self.misses = 0;
    }

    fn wait(&mut self) {
        match self.strategy {
            WaitStrategy::Blocking | WaitStrategy::BusySpin => std::hint::spin_loop(),
            WaitStrategy::Yielding { spin_tries } => {
                if self.misses < spin_tries {
                    self.misses += 1;
                    std::hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
            WaitStrategy::Sleeping { spin_tries, park } => {
                if self.misses < spin_tries {
                    self.misses += 1;
                    std::hint::spin_loop();
                } else {
                    thread::sleep(park);
                }
            }
        }
    }
}

fn next_event<R>(events: &Receiver<RingEvent<R>>, idle: &mut Idle) -> Option<RingEvent<R>> {
    if matches!(idle.strategy, WaitStrategy::Blocking) {
        return events.recv().ok();
    }
    loop {
        match events.try_recv() {
            Ok(event) => {
                idle.reset();
                return Some(event);
            }
            Err(TryRecvError::Empty) => idle.wait(),
            Err(TryRecvError::Disconnected) => return None,
        }
    }
}

fn run_consumer<R, P>(
    inner: P,
    events: Receiver<RingEvent<R>>,
    strategy: WaitStrategy,
    late: LateEvents,
) where
    P: RecordProcessor<R>,
{
    let mut idle = Idle::new(strategy);
    while let Some(event) = next_event(&events, &mut idle) {
        match event {
            RingEvent::Start(record) => inner.on_start(&record),
            RingEvent::End(record) => inner.on_end(record),
            RingEvent::Flush(result) => inner.force_flush().forward_to(&result),
            RingEvent::Shutdown(result) => {
                inner.shutdown().forward_to(&result);
                late.discard(&events);
                return;
            }
        }
    }
    // Every producer handle is gone without an explicit shutdown.
    let _ = inner.shutdown();
}
