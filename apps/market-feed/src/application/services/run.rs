//! Run Identity
//!
//! Every start of the batch poller begins a new run with a strictly larger
//! id. Work captured under an older id checks [`RunContext::is_current`]
//! before writing shared state, so a superseded run's in-flight results
//! are discarded. Beginning a run also cancels the previous run's token so
//! its sleeps end early.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Issues monotonically increasing run ids.
#[derive(Debug)]
pub struct RunRegistry {
    generation: Arc<AtomicU64>,
    active: Mutex<CancellationToken>,
    parent: CancellationToken,
}

impl RunRegistry {
    /// Create a registry whose runs are children of `parent`.
    #[must_use]
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(parent.child_token()),
            parent,
        }
    }

    /// Begin a new run, superseding the current one.
    pub fn begin(&self) -> RunContext {
        let token = self.parent.child_token();
        let previous = std::mem::replace(&mut *self.active.lock(), token.clone());
        previous.cancel();

        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        RunContext {
            id,
            generation: Arc::clone(&self.generation),
            token,
        }
    }

    /// Id of the most recently started run (0 before the first).
    #[must_use]
    pub fn current_id(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancel the active run without starting another.
    pub fn stop(&self) {
        self.active.lock().cancel();
    }
}

/// Handle held by one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    id: u64,
    generation: Arc<AtomicU64>,
    token: CancellationToken,
}

impl RunContext {
    /// This run's id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether this run is still the latest and has not been cancelled.
    #[must_use]
    pub fn is_current(&self) -> bool {
        !self.token.is_cancelled() && self.generation.load(Ordering::SeqCst) == self.id
    }

    /// Resolves when this run is cancelled or superseded.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration`. Returns `false` if the run ended first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return self.is_current();
        }
        tokio::select! {
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(duration) => self.is_current(),
        }
    }
}
