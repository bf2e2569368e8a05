//! Station registry.
//!
//! Maps caller-facing station names to the API's internal ids. Built once
//! from a directory query and never mutated afterwards.

use chargewatch_client::{ClientError, RateLimitedSession};
use chargewatch_protocol::{Coordinates, StationId, StationSummary};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// A caller-facing station identifier.
pub type StationKey = String;

/// Immutable station name to id mapping.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    by_key: BTreeMap<StationKey, StationId>,
    by_id: HashMap<StationId, StationKey>,
}

impl StationRegistry {
    /// Build the registry from the stations around `position`.
    ///
    /// # Errors
    ///
    /// Returns the directory query error; there is no partial registry.
    pub async fn fetch(
        session: &RateLimitedSession,
        position: Coordinates,
    ) -> Result<Self, ClientError> {
        let stations = session.fetch_stations(position).await?;
        let registry = Self::from_stations(stations);
        info!(%position, stations = registry.len(), "Station registry loaded");
        Ok(registry)
    }

    /// Build the registry from directory entries.
    ///
    /// When two entries share a name the later one wins.
    #[must_use]
    pub fn from_stations(stations: impl IntoIterator<Item = StationSummary>) -> Self {
        Self::from_entries(stations.into_iter().map(|s| (s.station_name, s.id)))
    }

    /// Build the registry from `(key, id)` pairs.
    #[must_use]
    pub fn from_entries<K: Into<StationKey>>(
        entries: impl IntoIterator<Item = (K, StationId)>,
    ) -> Self {
        let mut registry = Self::default();
        for (key, id) in entries {
            let key = key.into();
            if let Some(old) = registry.by_key.insert(key.clone(), id) {
                warn!(station = %key, old_id = old, new_id = id, "Duplicate station name");
                registry.by_id.remove(&old);
            }
            registry.by_id.insert(id, key);
        }
        registry
    }

    /// Look up the id of a station.
    #[must_use]
    pub fn id(&self, key: &str) -> Option<StationId> {
        self.by_key.get(key).copied()
    }

    /// Look up the name of a station id.
    #[must_use]
    pub fn key_of(&self, id: StationId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Check if a station name is known.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// All station names, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    /// All `(name, id)` pairs, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, StationId)> {
        self.by_key.iter().map(|(k, id)| (k.as_str(), *id))
    }

    /// Number of stations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the registry has no stations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;
    use std::sync::Arc;

    #[test]
    fn test_registry_lookup() {
        let registry = StationRegistry::from_entries([("North", 10), ("South", 20)]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.id("North"), Some(10));
        assert_eq!(registry.key_of(20), Some("South"));
        assert!(registry.id("East").is_none());
        assert!(!registry.contains("East"));
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["North", "South"]);
    }

    #[test]
    fn test_duplicate_name_keeps_last() {
        let registry = StationRegistry::from_entries([("Lot", 1), ("Lot", 2)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.id("Lot"), Some(2));
        assert!(registry.key_of(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_from_directory() {
        let source = Arc::new(ScriptedSource::new().with_directory([(1, "East"), (2, "West")]));
        let session = RateLimitedSession::with_defaults(source);

        let registry = StationRegistry::fetch(&session, Coordinates::new(116.3, 39.9))
            .await
            .unwrap();
        assert_eq!(registry.id("West"), Some(2));
        assert_eq!(registry.iter().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_fatal() {
        let source = Arc::new(ScriptedSource::new().with_failing_logins());
        let session = RateLimitedSession::with_defaults(source);

        let result = StationRegistry::fetch(&session, Coordinates::new(0.0, 0.0)).await;
        assert!(matches!(result, Err(ClientError::Auth(_))));
    }
}
