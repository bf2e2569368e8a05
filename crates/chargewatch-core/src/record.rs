//! Timestamped station observations.

use chargewatch_protocol::StationState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The last observed state of a station and when it was observed.
///
/// Records are immutable; each successful poll replaces the previous one.
#[derive(Debug, Clone)]
pub struct StationRecord {
    data: Arc<StationState>,
    observed_at: Instant,
}

impl StationRecord {
    /// Create a record observed now.
    #[must_use]
    pub fn new(data: Arc<StationState>) -> Self {
        Self::observed_at(data, Instant::now())
    }

    /// Create a record with an explicit observation time.
    #[must_use]
    pub fn observed_at(data: Arc<StationState>, observed_at: Instant) -> Self {
        Self { data, observed_at }
    }

    /// Get the observed state.
    #[must_use]
    pub fn data(&self) -> &Arc<StationState> {
        &self.data
    }

    /// Time since the observation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.observed_at.elapsed()
    }

    /// Whether the record is younger than `ttl`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_record_freshness() {
        let record = StationRecord::new(Arc::new(StationState::with_counts(1, 3)));
        let ttl = Duration::from_secs(30);
        assert!(record.is_fresh(ttl));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(record.is_fresh(ttl));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!record.is_fresh(ttl));
        assert_eq!(record.data().free_count(), 1);
    }
}
