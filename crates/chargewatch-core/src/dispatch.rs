//! Per-station hook dispatch.
//!
//! Every dispatch takes the station's lock for the whole hook call, so
//! dispatches for one station never overlap and always observe states in
//! poll order. Different stations dispatch independently.

use chargewatch_protocol::StationState;
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::engine::StationSlot;
use crate::hook::{Hook, HookOutcome};
use crate::sink::EventSink;

/// One pending hook invocation.
pub(crate) struct Dispatch {
    pub(crate) slot: Arc<StationSlot>,
    pub(crate) hook: Arc<dyn Hook>,
    pub(crate) current: Arc<StationState>,
    pub(crate) previous: Option<Arc<StationState>>,
    pub(crate) sink: Option<Arc<dyn EventSink>>,
}

impl Dispatch {
    /// Run the dispatch on its own task.
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    /// Invoke the hook if it is still registered and apply its outcome.
    pub(crate) async fn run(self) {
        let slot = self.slot;
        let mut state = slot.state.lock().await;
        if !state.contains(&self.hook) {
            trace!(station = %slot.key, "Hook unregistered before dispatch");
            return;
        }

        match self
            .hook
            .on_update(&slot.key, &self.current, self.previous.as_deref())
            .await
        {
            Ok(HookOutcome::Continue) => {}
            Ok(HookOutcome::Finished) => {
                state.remove(&self.hook);
                debug!(
                    station = %slot.key,
                    hooks = state.hooks.len(),
                    "Hook finished"
                );
                if state.hooks.is_empty() && state.stop_poller() {
                    debug!(station = %slot.key, "Last hook finished, poller stopped");
                }
            }
            Err(e) => {
                let message = format!("Error calling hook for station '{}': {}", slot.key, e);
                error!(station = %slot.key, error = %e, "Hook failed");
                if let Some(sink) = &self.sink {
                    sink.on_error(&e, &message);
                }
            }
        }
    }
}
