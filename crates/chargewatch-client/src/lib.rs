//! # chargewatch-client
//!
//! Access layer for the charging station status API.
//!
//! - **StatusSource** - Trait over the raw remote API (login, per-station
//!   detail, directory listing)
//! - **HttpStatusSource** - reqwest implementation of `StatusSource`
//! - **RateLimitedSession** - Wraps a source with request throttling,
//!   session management and failure escalation
//!
//! ```rust,ignore
//! use chargewatch_client::{Credentials, HttpStatusSource, RateLimitedSession};
//! use std::sync::Arc;
//!
//! let source = HttpStatusSource::new("https://api.example.com", Credentials::new("openid", "phone"))?;
//! let session = RateLimitedSession::with_defaults(Arc::new(source));
//! let state = session.fetch_station_state(42).await?;
//! ```

pub mod http;
pub mod session;
pub mod traits;

pub use http::{Credentials, HttpStatusSource};
pub use session::{RateLimitConfig, RateLimitedSession};
pub use traits::{AuthToken, ClientError, StatusSource};
