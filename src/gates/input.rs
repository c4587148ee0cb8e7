//! Input gate (C8): a nested lock that blocks I/O-completion observation on
//! an actor while closed. Built on a queue of one-shot wakeups rather than
//! `tokio::sync::Mutex` directly, since the "lock" here is a counter, not a
//! single critical section — nested `runWithClosed` calls must compose.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

struct State {
    lock_count: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

struct Inner {
    state: parking_lot::Mutex<State>,
}

/// A handle to an actor's input gate. Cloning shares the same underlying
/// lock count and waiter queue — this is how "child" gate contexts (spec
/// §4.8) propagate lock/unlock to their parent: a child is just another
/// handle to the same `Inner`.
#[derive(Clone)]
pub struct InputGate {
    inner: Arc<Inner>,
}

impl Default for InputGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InputGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: parking_lot::Mutex::new(State {
                    lock_count: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().lock_count > 0
    }

    /// Yields one turn then, if locked, suspends until unlocked. Called just
    /// before returning the result of an async I/O operation on this actor.
    pub async fn wait_for_open(&self) {
        tokio::task::yield_now().await;
        let rx = {
            let mut state = self.inner.state.lock();
            if state.lock_count == 0 {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Open-wait, then execute `f`.
    pub async fn run_with<R, F, Fut>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        self.wait_for_open().await;
        f().await
    }

    /// Increments the lock count, yields one microturn, runs `f` with a
    /// child gate context, then schedules an unlock after one more turn so
    /// the caller may re-lock before queued waiters proceed. Releases the
    /// lock even if `f` is never polled to completion (task cancellation).
    pub async fn run_with_closed<R, F, Fut>(&self, f: F) -> R
    where
        F: FnOnce(InputGate) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        {
            let mut state = self.inner.state.lock();
            state.lock_count += 1;
        }
        tokio::task::yield_now().await;

        let guard = LockGuard::new(self.clone());
        let child = self.clone();
        let result = f(child).await;
        guard.release().await;
        result
    }

    async fn unlock(&self) {
        let should_drain = {
            let mut state = self.inner.state.lock();
            state.lock_count = state.lock_count.saturating_sub(1);
            state.lock_count == 0
        };
        if should_drain {
            self.drain_waiters().await;
        }
    }

    /// Pop queued waiters FIFO, yielding a turn between each resolution so a
    /// just-woken waiter can re-lock before the next one proceeds.
    async fn drain_waiters(&self) {
        loop {
            let waiter = {
                let mut state = self.inner.state.lock();
                if state.lock_count > 0 {
                    return;
                }
                state.waiters.pop_front()
            };
            match waiter {
                Some(tx) => {
                    let _ = tx.send(());
                    tokio::task::yield_now().await;
                }
                None => return,
            }
        }
    }
}

/// Guarantees the lock acquired by `run_with_closed` is released exactly
/// once, whether the closure returns normally, panics, or its enclosing task
/// is dropped mid-poll.
struct LockGuard {
    gate: InputGate,
    released: AtomicBool,
}

impl LockGuard {
    fn new(gate: InputGate) -> Self {
        Self {
            gate,
            released: AtomicBool::new(false),
        }
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::task::yield_now().await;
        self.gate.unlock().await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let gate = self.gate.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { gate.unlock().await });
        } else {
            // No runtime available to run the deferred drain turn (e.g. we
            // are being dropped during process teardown); decrement
            // synchronously so the counter stays correct even though queued
            // waiters in this edge case won't be woken.
            let mut state = gate.inner.state.lock();
            state.lock_count = state.lock_count.saturating_sub(1);
        }
    }
}
