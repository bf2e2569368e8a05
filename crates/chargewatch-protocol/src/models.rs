//! Payload types of the station status API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status string the API reports for an idle pile.
pub const FREE_STATUS: &str = "空闲";

/// Internal station identifier assigned by the API.
pub type StationId = i64;

/// Geographic position used for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Latitude in decimal degrees.
    pub latitude: f64,
}

impl Coordinates {
    /// Create a new coordinate pair.
    #[must_use]
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.longitude, self.latitude)
    }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Payload; absent or `null` when the call produced nothing.
    pub data: Option<T>,
}

/// Login exchange result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    /// Bearer token for subsequent calls.
    pub access_token: String,
}

/// One entry of the station directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSummary {
    /// Internal identifier.
    pub id: StationId,
    /// Human-readable name, used as the station key.
    #[serde(rename = "stationName")]
    pub station_name: String,
    /// Remaining fields, passed through untouched.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl StationSummary {
    /// Create a summary without extra details.
    #[must_use]
    pub fn new(id: StationId, station_name: impl Into<String>) -> Self {
        Self {
            id,
            station_name: station_name.into(),
            details: serde_json::Map::new(),
        }
    }
}

/// A group of piles as returned by the per-station endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PileBox {
    /// Piles in this box.
    #[serde(default)]
    pub piles: Vec<Pile>,
}

/// A single charging pile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pile {
    /// Display status, e.g. `空闲` for idle.
    #[serde(rename = "showStatusString")]
    pub status: String,
    /// Remaining fields, passed through untouched.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl Pile {
    /// Create a pile with the given display status.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            details: serde_json::Map::new(),
        }
    }

    /// Create an idle pile.
    #[must_use]
    pub fn free() -> Self {
        Self::new(FREE_STATUS)
    }

    /// Whether the pile is idle.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.status == FREE_STATUS
    }
}

/// Observed state of one station: every pile across all of its boxes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationState {
    /// Flattened pile list.
    pub piles: Vec<Pile>,
}

impl StationState {
    /// Create a state from a pile list.
    #[must_use]
    pub fn new(piles: Vec<Pile>) -> Self {
        Self { piles }
    }

    /// Build a state with `free` idle piles out of `total`.
    ///
    /// Non-idle piles are reported as occupied.
    #[must_use]
    pub fn with_counts(free: usize, total: usize) -> Self {
        let piles = (0..total.max(free))
            .map(|i| if i < free { Pile::free() } else { Pile::new("充电中") })
            .collect();
        Self { piles }
    }

    /// Number of idle piles.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.piles.iter().filter(|p| p.is_free()).count()
    }

    /// Total number of piles.
    #[must_use]
    pub fn total(&self) -> usize {
        self.piles.len()
    }
}
