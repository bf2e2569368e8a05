//! # chargewatch-protocol
//!
//! Wire types for the charging station status API.
//!
//! The remote API wraps every payload in a JSON envelope of the form
//! `{"data": ...}`. This crate defines the payload types and the decoding
//! helpers that unwrap them:
//!
//! - `LoginData` - Bearer token returned by the login exchange
//! - `StationSummary` - One entry of the station directory listing
//! - `StationState` - Flattened list of charging piles for one station
//!
//! ## Example
//!
//! ```rust
//! use chargewatch_protocol::codec;
//!
//! let body = r#"{"data":[{"piles":[{"showStatusString":"空闲"}]}]}"#.as_bytes();
//! let state = codec::decode_station_state(body).unwrap();
//! assert_eq!(state.free_count(), 1);
//! ```

pub mod codec;
pub mod models;

pub use codec::ProtocolError;
pub use models::{Coordinates, LoginData, Pile, StationId, StationState, StationSummary, FREE_STATUS};
