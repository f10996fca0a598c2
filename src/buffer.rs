// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity buffer of in-flight records.
//!
//! Records are kept in a doubly linked list threaded through a slot arena:
//! every slot stores the indices of its neighbours, and a `RecordId -> slot`
//! index finds any linked record without scanning. Insertion links at the
//! head (newest), draining unlinks from the tail (oldest), and removal of an
//! arbitrary record patches its neighbours in O(1).
//!
//! All operations serialize on one internal mutex that is only held for
//! pointer updates. The mutex is not reentrant.

use crate::error::ConfigError;
use crate::record::{Record, RecordId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Error returned when a record cannot be linked into the buffer.
///
/// The rejected record is handed back to the caller, who decides whether
/// to drop it.
#[derive(Debug)]
pub enum InsertError<R> {
    /// The buffer is at capacity.
    Full(R),
    /// A record with the same identity is already linked.
    AlreadyLinked(R),
    /// The buffer was closed.
    Closed(R),
}

impl<R> InsertError<R> {
    /// Recover the rejected record.
    pub fn into_inner(self) -> R {
        match self {
            InsertError::Full(r) | InsertError::AlreadyLinked(r) | InsertError::Closed(r) => r,
        }
    }
}

struct Slot<R> {
    record: Option<R>,
    /// Neighbour towards the head (newer).
    prev: Option<usize>,
    /// Neighbour towards the tail (older).
    next: Option<usize>,
}

struct List<R> {
    slots: Vec<Slot<R>>,
    free: Vec<usize>,
    index: HashMap<RecordId, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    closed: bool,
}

impl<R: Record> List<R> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
            len: 0,
            closed: false,
        }
    }

    fn link_at_head(&mut self, record: R) {
        let id = record.id();
        let slot = Slot {
            record: Some(record),
            prev: None,
            next: self.head,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        match self.head {
            Some(old_head) => self.slots[old_head].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        let _ = self.index.insert(id, idx);
        self.len += 1;
    }

    fn unlink(&mut self, idx: usize) -> Option<R> {
        let prev = self.slots[idx].prev.take();
        let next = self.slots[idx].next.take();
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        let record = self.slots[idx].record.take()?;
        let _ = self.index.remove(&record.id());
        self.free.push(idx);
        self.len -= 1;
        Some(record)
    }

    fn clear(&mut self) -> usize {
        let cleared = self.len;
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        cleared
    }
}

/// A bounded, thread-safe holder of records waiting to be exported.
pub struct BoundedBuffer<R> {
    capacity: usize,
    list: Mutex<List<R>>,
    not_full: Condvar,
}

impl<R: Record> BoundedBuffer<R> {
    /// Creates an empty buffer holding at most `capacity` records.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidCapacity` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "buffer capacity",
                value: capacity,
            });
        }
        Ok(Self {
            capacity,
            list: Mutex::new(List::with_capacity(capacity)),
            not_full: Condvar::new(),
        })
    }

    /// Links `record` at the head of the buffer.
    ///
    /// Returns the number of buffered records after the insert. A rejected
    /// insert leaves size and order untouched.
    pub fn insert(&self, record: R) -> Result<usize, InsertError<R>> {
        let mut list = self.list.lock();
        self.try_link(&mut list, record)
    }

    /// Like [`insert`](Self::insert), but waits for space while the buffer is
    /// full, up to `timeout` when one is given.
    ///
    /// Returns `InsertError::Full` when the timeout elapses and
    /// `InsertError::Closed` if the buffer is closed while waiting.
    pub fn insert_blocking(
        &self,
        record: R,
        timeout: Option<Duration>,
    ) -> Result<usize, InsertError<R>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut list = self.list.lock();
        loop {
            if list.closed || list.len < self.capacity || list.index.contains_key(&record.id()) {
                return self.try_link(&mut list, record);
            }
            match deadline {
                Some(deadline) => {
                    if self.not_full.wait_until(&mut list, deadline).timed_out()
                        && list.len >= self.capacity
                    {
                        return Err(InsertError::Full(record));
                    }
                }
                None => self.not_full.wait(&mut list),
            }
        }
    }

    fn try_link(&self, list: &mut List<R>, record: R) -> Result<usize, InsertError<R>> {
        if list.closed {
            return Err(InsertError::Closed(record));
        }
        if list.index.contains_key(&record.id()) {
            return Err(InsertError::AlreadyLinked(record));
        }
        if list.len >= self.capacity {
            return Err(InsertError::Full(record));
        }
        list.link_at_head(record);
        Ok(list.len)
    }

    /// Unlinks the record with the given identity, if it is linked.
    pub fn remove(&self, id: RecordId) -> Option<R> {
        let mut list = self.list.lock();
        let idx = *list.index.get(&id)?;
        let record = list.unlink(idx);
        drop(list);
        if record.is_some() {
            let _ = self.not_full.notify_one();
        }
        record
    }

    /// Returns true if a record with this identity is linked.
    pub fn contains(&self, id: RecordId) -> bool {
        self.list.lock().index.contains_key(&id)
    }

    /// Removes and returns at most `max` records, oldest first.
    pub fn drain_up_to(&self, max: usize) -> Vec<R> {
        let mut list = self.list.lock();
        let mut drained = Vec::with_capacity(max.min(list.len));
        while drained.len() < max {
            let Some(tail) = list.tail else {
                break;
            };
            match list.unlink(tail) {
                Some(record) => drained.push(record),
                None => break,
            }
        }
        drop(list);
        if !drained.is_empty() {
            let _ = self.not_full.notify_all();
        }
        drained
    }

    /// Unlinks every record without handing any of them out.
    ///
    /// Returns how many records were discarded.
    pub fn clear(&self) -> usize {
        let cleared = self.list.lock().clear();
        if cleared > 0 {
            let _ = self.not_full.notify_all();
        }
        cleared
    }

    /// Rejects all further inserts and wakes producers blocked on a full
    /// buffer. Records already linked stay until drained.
    pub fn close(&self) {
        self.list.lock().closed = true;
        let _ = self.not_full.notify_all();
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.list.lock().closed
    }

    /// Number of linked records.
    pub fn len(&self) -> usize {
        self.list.lock().len
    }

    /// Returns true if no record is linked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of linked records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<R: Record + Clone> BoundedBuffer<R> {
    /// Snapshot of the linked records, oldest first.
    pub fn to_vec(&self) -> Vec<R> {
        let list = self.list.lock();
        let mut out = Vec::with_capacity(list.len);
        let mut cursor = list.tail;
        while let Some(idx) = cursor {
            let slot = &list.slots[idx];
            if let Some(record) = &slot.record {
                out.push(record.clone());
            }
            cursor = slot.prev;
        }
        out
    }
}
