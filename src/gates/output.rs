//! Output gate (C8): collects in-flight write "promises" (modeled as
//! spawned tasks) and lets callers block until all of them have settled.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A handle to an actor's output gate.
#[derive(Clone)]
pub struct OutputGate {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Default for OutputGate {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputGate {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers `fut` with this gate (spawning it immediately so it starts
    /// making progress) so a later [`Self::wait_for_open_output`] call
    /// blocks until it settles.
    pub fn wait_until<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(fut, true);
    }

    /// Spawns `fut` so it always runs, tracking it for
    /// [`Self::wait_for_open_output`] only when `track` is true. Backs
    /// `waitUntilOnOutputGate`'s `allowUnconfirmed` flag one layer up in
    /// `context`, where `allowUnconfirmed` still needs the write to happen —
    /// it just isn't awaited before the response is considered complete.
    pub fn spawn<F>(&self, fut: F, track: bool)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        if track {
            self.pending.lock().push(handle);
        }
    }

    /// Awaits every promise registered so far, then clears the queue.
    pub async fn wait_for_open_output(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Executes `f` in gate context, then awaits all registered promises.
    pub async fn run_with<R, F, Fut>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let result = f().await;
        self.wait_for_open_output().await;
        result
    }
}
