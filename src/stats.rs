// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between producers and the background worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    dropped_records: AtomicU64,
    exported_records: AtomicU64,
    exported_batches: AtomicU64,
    failed_records: AtomicU64,
    failed_batches: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records discarded before reaching an exporter (full buffer, shutdown).
    pub dropped_records: u64,
    /// Records in successfully exported batches.
    pub exported_records: u64,
    /// Successfully exported batches.
    pub exported_batches: u64,
    /// Records in batches whose export failed or timed out.
    pub failed_records: u64,
    /// Batches whose export failed or timed out.
    pub failed_batches: u64,
}

impl PipelineStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_dropped(&self, records: u64) {
        let _ = self.dropped_records.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn record_exported(&self, records: usize) {
        let _ = self
            .exported_records
            .fetch_add(records as u64, Ordering::Relaxed);
        let _ = self.exported_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, records: usize) {
        let _ = self
            .failed_records
            .fetch_add(records as u64, Ordering::Relaxed);
        let _ = self.failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of dropped records so far.
    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            exported_records: self.exported_records.load(Ordering::Relaxed),
            exported_batches: self.exported_batches.load(Ordering::Relaxed),
            failed_records: self.failed_records.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
        }
    }
}
