//! Async FIFO mutex (C2): a single-holder lock used by higher-level callers
//! that need serial access to a custom shared resource. Not reentrant.
//!
//! Built on [`tokio::sync::Mutex`], which already queues waiters fairly; this
//! wrapper only adds the `has_waiting` observability spec.md calls for and a
//! `run_with` closure-style API so callers can't forget to release the lock.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex as TokioMutex;

/// A FIFO async mutex guarding a value of type `T`.
pub struct Mutex<T> {
    inner: TokioMutex<T>,
    waiting: AtomicUsize,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: TokioMutex::new(value),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Whether any task is currently queued behind the current holder.
    pub fn has_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst) > 0
    }

    /// Acquire the lock exclusively and run `f` against the guarded value.
    /// The lock is released once `f`'s future resolves, whether it returned
    /// successfully or not (a panic inside `f` still unwinds through the
    /// guard's `Drop`, releasing it).
    pub async fn run_with<R, F, Fut>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> Fut,
        Fut: Future<Output = R>,
    {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.inner.lock().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        f(&mut guard).await
    }
}
