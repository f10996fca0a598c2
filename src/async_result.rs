// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Write-once completion handle shared by every asynchronous operation of
//! the pipeline (export, flush, shutdown).
//!
//! An [`AsyncResult`] starts pending and transitions exactly once to
//! succeeded or failed. Any number of clones can observe it: by polling, by
//! blocking with or without a timeout, by registering a callback, or by
//! awaiting it as a [`Future`].

use crate::error::{ExportError, ExportResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce(&ExportResult) + Send>;

enum State {
    Pending {
        callbacks: Vec<Callback>,
        wakers: Vec<Waker>,
    },
    Done(ExportResult),
}

struct Shared {
    state: Mutex<State>,
    completed: Condvar,
}

/// A future-like, write-once completion handle.
#[derive(Clone)]
pub struct AsyncResult {
    shared: Arc<Shared>,
}

impl Default for AsyncResult {
    fn default() -> Self {
        Self::pending()
    }
}

impl AsyncResult {
    fn with_state(state: State) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                completed: Condvar::new(),
            }),
        }
    }

    /// A result that has not completed yet.
    pub fn pending() -> Self {
        Self::with_state(State::Pending {
            callbacks: Vec::new(),
            wakers: Vec::new(),
        })
    }

    /// An already succeeded result.
    pub fn succeeded() -> Self {
        Self::with_state(State::Done(Ok(())))
    }

    /// An already failed result.
    pub fn failed(error: ExportError) -> Self {
        Self::with_state(State::Done(Err(error)))
    }

    /// An already completed result carrying `result`.
    pub fn from_result(result: ExportResult) -> Self {
        Self::with_state(State::Done(result))
    }

    /// Marks the result succeeded. See [`complete`](Self::complete).
    pub fn succeed(&self) -> bool {
        self.complete(Ok(()))
    }

    /// Marks the result failed. See [`complete`](Self::complete).
    pub fn fail(&self, error: ExportError) -> bool {
        self.complete(Err(error))
    }

    /// Completes the result.
    ///
    /// Only the first completion takes effect; later calls return `false`
    /// and leave the stored outcome untouched. Registered callbacks run on
    /// the calling thread, after the internal lock is released.
    pub fn complete(&self, result: ExportResult) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending { callbacks, wakers } => {
                    let taken = (std::mem::take(callbacks), std::mem::take(wakers));
                    *state = State::Done(result.clone());
                    taken
                }
            }
        };
        let _ = self.shared.completed.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            callback(&result);
        }
        true
    }

    /// Makes `other` complete with the same outcome as `self`.
    pub fn forward_to(&self, other: &AsyncResult) {
        let other = other.clone();
        self.on_complete(move |result| {
            let _ = other.complete(result.clone());
        });
    }

    /// Returns the outcome without blocking, or `None` while pending.
    pub fn poll(&self) -> Option<ExportResult> {
        match &*self.shared.state.lock() {
            State::Done(result) => Some(result.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Returns true once completed, successfully or not.
    pub fn is_done(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Done(_))
    }

    /// Returns true if completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Done(Ok(())))
    }

    /// Blocks until completed.
    pub fn wait(&self) -> ExportResult {
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            self.shared.completed.wait(&mut state);
        }
    }

    /// Blocks until completed or until `timeout` elapses.
    ///
    /// Returns `None` if the result is still pending at the deadline; the
    /// underlying operation keeps running and may complete later.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExportResult> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(result) = &*state {
                return Some(result.clone());
            }
            if self
                .shared
                .completed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match &*state {
                    State::Done(result) => Some(result.clone()),
                    State::Pending { .. } => None,
                };
            }
        }
    }

    /// Registers a callback run exactly once with the outcome.
    ///
    /// If the result already completed, the callback runs immediately on the
    /// calling thread; otherwise on the thread that completes it.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&ExportResult) + Send + 'static,
    {
        let result = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                State::Done(result) => result.clone(),
            }
        };
        callback(&result);
    }

    /// Joins several results into one.
    ///
    /// The joined result succeeds iff every input succeeds. The first
    /// failure is recorded as soon as it is observed, but the joined result
    /// only completes once every input has completed. Joining nothing
    /// yields a succeeded result.
    pub fn join<I>(results: I) -> AsyncResult
    where
        I: IntoIterator<Item = AsyncResult>,
    {
        let results: Vec<AsyncResult> = results.into_iter().collect();
        if results.is_empty() {
            return AsyncResult::succeeded();
        }

        let joined = AsyncResult::pending();
        let remaining = Arc::new(AtomicUsize::new(results.len()));
        let first_failure: Arc<Mutex<Option<ExportError>>> = Arc::new(Mutex::new(None));

        for result in results {
            let joined = joined.clone();
            let remaining = Arc::clone(&remaining);
            let first_failure = Arc::clone(&first_failure);
            result.on_complete(move |outcome| {
                if let Err(error) = outcome {
                    let mut failure = first_failure.lock();
                    if failure.is_none() {
                        *failure = Some(error.clone());
                    }
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let failure = first_failure.lock().take();
                    let _ = joined.complete(failure.map_or(Ok(()), Err));
                }
            });
        }
        joined
    }
}

impl Future for AsyncResult {
    type Output = ExportResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ExportResult> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Done(result) => Poll::Ready(result.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.shared.state.lock() {
            State::Pending { .. } => f.write_str("AsyncResult(pending)"),
            State::Done(result) => write!(f, "AsyncResult({result:?})"),
        }
    }
}
