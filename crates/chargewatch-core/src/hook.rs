//! Hook interface.
//!
//! A hook is one subscriber's interest in a station. The engine calls it
//! with every newly polled state together with the state from the poll
//! before, and removes it once it reports [`HookOutcome::Finished`].

use async_trait::async_trait;
use chargewatch_protocol::StationState;
use std::sync::Arc;
use thiserror::Error;

/// What a hook wants after handling an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Keep the hook registered.
    Continue,
    /// Subscription satisfied; unregister the hook.
    Finished,
}

/// Errors raised by a hook. The hook stays registered.
#[derive(Debug, Error)]
pub enum HookError {
    /// Delivering a notification failed.
    #[error("Notification failed: {0}")]
    Notify(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// A callback registered for one station.
///
/// Dispatch for a station holds that station's lock while the hook runs,
/// so a hook must not register or unregister hooks for the same station
/// from inside `on_update`; return [`HookOutcome::Finished`] instead.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Handle a new state. `previous` is the station's state from the poll
    /// before, or `None` when there is none or when replaying the cache to
    /// a newly registered hook.
    async fn on_update(
        &self,
        station: &str,
        current: &StationState,
        previous: Option<&StationState>,
    ) -> Result<HookOutcome, HookError>;
}

/// Identity comparison for registered hooks.
#[must_use]
pub fn same_hook(a: &Arc<dyn Hook>, b: &Arc<dyn Hook>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Hook for Noop {
        async fn on_update(
            &self,
            _station: &str,
            _current: &StationState,
            _previous: Option<&StationState>,
        ) -> Result<HookOutcome, HookError> {
            Ok(HookOutcome::Continue)
        }
    }

    #[test]
    fn test_same_hook_is_identity() {
        let a: Arc<dyn Hook> = Arc::new(Noop);
        let b: Arc<dyn Hook> = Arc::new(Noop);
        assert!(same_hook(&a, &a.clone()));
        assert!(!same_hook(&a, &b));
    }
}
