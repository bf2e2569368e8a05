//! The seam between the session layer and the remote API.

use async_trait::async_trait;
use chargewatch_protocol::{Coordinates, ProtocolError, StationId, StationState, StationSummary};
use std::fmt;
use thiserror::Error;

/// Bearer token obtained from a login exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

impl From<String> for AuthToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Login exchange failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("Unexpected status {status} from {endpoint}")]
    Status {
        /// Endpoint path.
        endpoint: &'static str,
        /// HTTP status code.
        status: u16,
    },

    /// Response body could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Whether the error is a transient upstream failure worth retrying on
    /// the next poll.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Auth(_))
    }
}

/// Raw access to the remote status API.
///
/// Implementations perform exactly one upstream call per method and do no
/// throttling or session bookkeeping of their own; that is the job of
/// [`RateLimitedSession`](crate::RateLimitedSession).
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Perform the login exchange.
    async fn login(&self) -> Result<AuthToken, ClientError>;

    /// Fetch the pile states of one station.
    async fn station_state(
        &self,
        token: &AuthToken,
        id: StationId,
    ) -> Result<StationState, ClientError>;

    /// List the stations around a position.
    async fn stations(
        &self,
        token: &AuthToken,
        position: Coordinates,
    ) -> Result<Vec<StationSummary>, ClientError>;

    /// Get the source name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AuthToken::new("secret-token");
        assert_eq!(format!("{:?}", token), "AuthToken(***)");
        assert_eq!(token.as_str(), "secret-token");
    }

    #[test]
    fn test_transient_classification() {
        assert!(!ClientError::Auth("bad credentials".into()).is_transient());
        assert!(ClientError::Status {
            endpoint: "/api/ChargeStation/boxpiles",
            status: 502
        }
        .is_transient());
    }
}
