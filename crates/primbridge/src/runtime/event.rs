use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone)]
enum EventState {
    Pending,
    Complete,
    Failed(BridgeError),
}

struct EventInner {
    state: Mutex<EventState>,
    ready: Condvar,
}

/// Completion signal of one managed-runtime operation.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock().map(|state| state.clone());
        f.debug_struct("Event").field("state", &state).finish()
    }
}

impl Event {
    pub(crate) fn pending() -> Self {
        Self::with_state(EventState::Pending)
    }

    pub fn completed() -> Self {
        Self::with_state(EventState::Complete)
    }

    fn with_state(state: EventState) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(state),
                ready: Condvar::new(),
            }),
        }
    }

    pub(crate) fn complete(&self, result: BridgeResult<()>) {
        if let Ok(mut state) = self.lock() {
            *state = match result {
                Ok(()) => EventState::Complete,
                Err(err) => EventState::Failed(err),
            };
        }
        self.inner.ready.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        self.lock()
            .map(|state| !matches!(*state, EventState::Pending))
            .unwrap_or(true)
    }

    /// Blocks until the operation finishes and returns its outcome.
    pub fn wait(&self) -> BridgeResult<()> {
        let mut state = self.lock()?;
        while matches!(*state, EventState::Pending) {
            state = self
                .inner
                .ready
                .wait(state)
                .map_err(|_| BridgeError::runtime("event mutex poisoned"))?;
        }
        match &*state {
            EventState::Failed(err) => Err(err.clone()),
            EventState::Complete | EventState::Pending => Ok(()),
        }
    }

    fn lock(&self) -> BridgeResult<MutexGuard<'_, EventState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| BridgeError::runtime("event mutex poisoned"))
    }
}
