//! Debounced model switching
//!
//! Rapid accidental reselection should not tear down and rebuild session
//! state, so a model switch starts a fixed-delay timer and raises the
//! "switching" flag immediately; a second switch inside the window cancels
//! and supersedes the first. Exactly one effective change results, matching
//! the last requested target.

use crate::core::client_state::ClientState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

pub struct ModelSwitcher {
    state: Arc<Mutex<ClientState>>,
    delay: Duration,
    pending: Option<AbortHandle>,
}

impl ModelSwitcher {
    pub fn new(state: Arc<Mutex<ClientState>>, delay: Duration) -> Self {
        Self {
            state,
            delay,
            pending: None,
        }
    }

    /// Request a switch to `tag`. The switching flag is raised immediately
    /// (sends are disabled while it is up); the model itself changes only
    /// when the debounce timer fires. A pending switch is cancelled and
    /// superseded. Returns the handle of the scheduled apply so callers can
    /// await the effective change.
    pub fn switch_to(&mut self, tag: &str) -> JoinHandle<()> {
        if let Some(prev) = self.pending.take() {
            prev.abort();
        }

        {
            let mut state = self.state.lock().expect("client state poisoned");
            state.set_model_switching(true);
        }

        let state = Arc::clone(&self.state);
        let delay = self.delay;
        let tag = tag.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = state.lock().expect("client state poisoned");
            tracing::debug!("Applying debounced model switch to {}", tag);
            state.set_selected_model(&tag);
            state.set_model_switching(false);
        });
        self.pending = Some(handle.abort_handle());
        handle
    }
}

impl Drop for ModelSwitcher {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}
