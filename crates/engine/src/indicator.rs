//! Busy indicator for async work
//!
//! Transactions started with an indicator report to it while their async
//! body runs. UI code polls `is_busy` or awaits `when_busy`/`when_idle`.

use parking_lot::Mutex;
use ripple_concurrency::{Monitor, Worker};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

#[derive(Default)]
struct IndicatorState {
    counter: usize,
    workers: Vec<Worker>,
}

/// Counts the async transactions currently running under it
pub struct Indicator {
    hint: String,
    state: Mutex<IndicatorState>,
    busy: watch::Sender<bool>,
}

impl Indicator {
    /// Create an idle indicator
    pub fn new(hint: impl Into<String>) -> Arc<Self> {
        let (busy, _) = watch::channel(false);
        Arc::new(Self {
            hint: hint.into(),
            state: Mutex::new(IndicatorState::default()),
            busy,
        })
    }

    /// Indicator name
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Whether at least one worker is running
    pub fn is_busy(&self) -> bool {
        self.state.lock().counter > 0
    }

    /// Number of running workers
    pub fn counter(&self) -> usize {
        self.state.lock().counter
    }

    /// Running workers in the order they entered
    pub fn workers(&self) -> Vec<Worker> {
        self.state.lock().workers.clone()
    }

    /// Resolves once the indicator is busy
    pub async fn when_busy(&self) {
        self.wait_for(true).await;
    }

    /// Resolves once the indicator is idle
    pub async fn when_idle(&self) {
        self.wait_for(false).await;
    }

    async fn wait_for(&self, busy: bool) {
        let mut rx = self.busy.subscribe();
        let _ = rx.wait_for(|b| *b == busy).await;
    }
}

impl Monitor for Indicator {
    fn enter(&self, worker: &Worker) {
        let became_busy = {
            let mut state = self.state.lock();
            state.counter += 1;
            state.workers.push(worker.clone());
            state.counter == 1
        };
        trace!(indicator = %self.hint, worker = %worker.id, "worker entered");
        if became_busy {
            self.busy.send_replace(true);
        }
    }

    fn leave(&self, worker: &Worker) {
        let became_idle = {
            let mut state = self.state.lock();
            if let Some(pos) = state.workers.iter().position(|w| w.id == worker.id) {
                state.workers.remove(pos);
                state.counter -= 1;
            }
            state.counter == 0
        };
        trace!(indicator = %self.hint, worker = %worker.id, "worker left");
        if became_idle {
            self.busy.send_replace(false);
        }
    }
}

impl fmt::Debug for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Indicator")
            .field("hint", &self.hint)
            .field("counter", &state.counter)
            .finish()
    }
}
