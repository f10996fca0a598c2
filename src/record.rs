// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Records and batches.
//!
//! The pipeline treats a record as opaque: it only needs a stable identity
//! (used as the buffer key) and whether the record has ended.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity of a record while it is inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Returns the raw value.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Thread-safe generator for unique record ids.
#[derive(Debug)]
pub struct RecordIdGenerator {
    next_id: AtomicU64,
}

impl Default for RecordIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordIdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Generate the next unique id.
    pub fn next_id(&self) -> RecordId {
        RecordId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// A finished (or finishing) telemetry item: span, metric point or log entry.
///
/// A batch is shared read-only by every exporter it reaches.
pub trait Record: Send + Sync + 'static {
    /// Identity used to link the record into a buffer.
    fn id(&self) -> RecordId;

    /// Whether the record has ended. Only ended records are batched.
    fn is_ended(&self) -> bool {
        true
    }
}

/// An immutable, ordered group of records drained together.
///
/// Cloning is cheap: clones share the same records, which is how a single
/// batch reaches several exporters.
pub struct Batch<R> {
    records: Arc<[R]>,
}

impl<R> Batch<R> {
    /// Wrap drained records into a batch.
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Returns the records in drain order.
    pub fn records(&self) -> &[R] {
        &self.records
    }
}

impl<R> Clone for Batch<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R> Deref for Batch<R> {
    type Target = [R];

    fn deref(&self) -> &[R] {
        &self.records
    }
}

impl<R> From<Vec<R>> for Batch<R> {
    fn from(records: Vec<R>) -> Self {
        Self::new(records)
    }
}

impl<R: fmt::Debug> fmt::Debug for Batch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("len", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_generator() {
        let ids = RecordIdGenerator::new();
        assert_eq!(ids.next_id().as_u64(), 1);
        assert_eq!(ids.next_id().as_u64(), 2);
        assert_eq!(ids.next_id().as_u64(), 3);
    }

    #[test]
    fn test_record_id_display() {
        assert_eq!(RecordId(255).to_string(), "00000000000000ff");
    }

    #[test]
    fn test_batch_clones_share_records() {
        let batch = Batch::new(vec![1, 2, 3]);
        let other = batch.clone();
        assert_eq!(other.len(), 3);
        assert_eq!(other.records(), &[1, 2, 3]);
        assert!(std::ptr::eq(batch.records().as_ptr(), other.records().as_ptr()));
    }
}
