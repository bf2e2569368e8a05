//! Free-slot threshold subscriptions.
//!
//! A subscription waits until a station has at least `threshold` idle
//! piles, then reports every change of the idle count until the station is
//! full again or the subscription expires.
//!
//! The transitions live in [`SubscriptionState::evaluate`], a pure function
//! of the state and the observed counts; [`ThresholdHook`] adapts it to the
//! [`Hook`] interface and sends the resulting notices through a
//! [`Notifier`].

use async_trait::async_trait;
use chargewatch_protocol::StationState;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::hook::{Hook, HookError, HookOutcome};

/// Largest accepted threshold.
pub const MAX_THRESHOLD: usize = 5;

/// Shortest accepted subscription.
pub const MIN_DURATION: Duration = Duration::from_secs(60);

/// Longest accepted subscription.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Invalid subscription parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Threshold outside `1..=MAX_THRESHOLD`.
    #[error("Threshold must be between 1 and {MAX_THRESHOLD}, got {0}")]
    Threshold(usize),

    /// Duration outside `MIN_DURATION..=MAX_DURATION`.
    #[error("Duration must be between 1 minute and 24 hours, got {0:?}")]
    Duration(Duration),
}

/// Something a subscriber should be told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Idle count reached the threshold for the first time.
    ThresholdReached {
        /// Current idle count.
        free: usize,
    },
    /// Idle count changed after the threshold was reached.
    FreeCountChanged {
        /// Current idle count.
        free: usize,
    },
    /// No idle piles left; the subscription ends.
    Full,
    /// The subscription ran out of time.
    Expired,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThresholdReached { free } => write!(f, "enough free piles, {} free now", free),
            Self::FreeCountChanged { free } => write!(f, "free piles changed, {} free now", free),
            Self::Full => f.write_str("all piles taken, subscription ended"),
            Self::Expired => f.write_str("subscription expired"),
        }
    }
}

/// Result of one evaluation step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Notices to deliver, in order.
    pub notices: Vec<Notice>,
    /// Whether the subscription is done.
    pub finished: bool,
}

/// State of one threshold subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    threshold: usize,
    triggered: bool,
    expires_at: Instant,
}

impl SubscriptionState {
    /// Create a subscription starting now.
    ///
    /// # Errors
    ///
    /// Returns an error if the threshold or duration is out of range.
    pub fn new(threshold: usize, duration: Duration) -> Result<Self, SubscriptionError> {
        if !(1..=MAX_THRESHOLD).contains(&threshold) {
            return Err(SubscriptionError::Threshold(threshold));
        }
        if !(MIN_DURATION..=MAX_DURATION).contains(&duration) {
            return Err(SubscriptionError::Duration(duration));
        }
        Ok(Self {
            threshold,
            triggered: false,
            expires_at: Instant::now() + duration,
        })
    }

    /// Idle count that triggers the subscription.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether the threshold has been reached.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// When the subscription expires.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Advance the subscription with a new observation.
    pub fn evaluate(&mut self, free: usize, previous_free: usize, now: Instant) -> Evaluation {
        let mut evaluation = Evaluation::default();

        if !self.triggered {
            if free >= self.threshold {
                self.triggered = true;
                evaluation.notices.push(Notice::ThresholdReached { free });
            }
        } else if free == 0 {
            evaluation.notices.push(Notice::Full);
            evaluation.finished = true;
            return evaluation;
        } else if free != previous_free {
            evaluation.notices.push(Notice::FreeCountChanged { free });
        }

        if now >= self.expires_at {
            evaluation.notices.push(Notice::Expired);
            evaluation.finished = true;
        }
        evaluation
    }
}

/// Delivers subscription notices to a subscriber.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notice about `station`.
    async fn notify(&self, station: &str, notice: &Notice) -> Result<(), HookError>;
}

/// [`Hook`] that drives a [`SubscriptionState`].
pub struct ThresholdHook {
    state: Mutex<SubscriptionState>,
    notifier: Arc<dyn Notifier>,
}

impl ThresholdHook {
    /// Create a hook for a subscription.
    #[must_use]
    pub fn new(state: SubscriptionState, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            state: Mutex::new(state),
            notifier,
        }
    }

    /// Snapshot of the subscription state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl Hook for ThresholdHook {
    async fn on_update(
        &self,
        station: &str,
        current: &StationState,
        previous: Option<&StationState>,
    ) -> Result<HookOutcome, HookError> {
        let evaluation = self.state.lock().evaluate(
            current.free_count(),
            previous.map_or(0, StationState::free_count),
            Instant::now(),
        );

        for notice in &evaluation.notices {
            self.notifier.notify(station, notice).await?;
        }

        Ok(if evaluation.finished {
            HookOutcome::Finished
        } else {
            HookOutcome::Continue
        })
    }
}
