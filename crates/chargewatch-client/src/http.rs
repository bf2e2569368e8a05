//! reqwest-backed implementation of [`StatusSource`].

use async_trait::async_trait;
use chargewatch_protocol::{codec, Coordinates, StationId, StationState, StationSummary};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::traits::{AuthToken, ClientError, StatusSource};

const LOGIN_PATH: &str = "/api/MiniAccount/Login";
const PILES_PATH: &str = "/api/ChargeStation/boxpiles";
const LIST_PATH: &str = "/api/ChargeStation/list";

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Account identity used for the login exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Mini-program open id.
    pub openid: String,
    /// Registered phone number.
    pub phonenumber: String,
}

impl Credentials {
    /// Create credentials.
    #[must_use]
    pub fn new(openid: impl Into<String>, phonenumber: impl Into<String>) -> Self {
        Self {
            openid: openid.into(),
            phonenumber: phonenumber.into(),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    openid: &'a str,
    phonenumber: &'a str,
}

/// HTTP status source.
pub struct HttpStatusSource {
    client: Client,
    host: String,
    credentials: Credentials,
}

impl HttpStatusSource {
    /// Create a source talking to `host` (scheme and authority, no trailing
    /// slash required).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_client(client, host, credentials))
    }

    /// Create a source with a preconfigured client.
    #[must_use]
    pub fn with_client(client: Client, host: impl Into<String>, credentials: Credentials) -> Self {
        let host = host.into().trim_end_matches('/').to_string();
        Self {
            client,
            host,
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn login(&self) -> Result<AuthToken, ClientError> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&LoginRequest {
                openid: &self.credentials.openid,
                phonenumber: &self.credentials.phonenumber,
            })
            .send()
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Auth(format!("login returned {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;
        let login = codec::decode_login(&body).map_err(|e| ClientError::Auth(e.to_string()))?;

        info!(host = %self.host, "Logged in to status API");
        Ok(AuthToken::new(login.access_token))
    }

    async fn station_state(
        &self,
        token: &AuthToken,
        id: StationId,
    ) -> Result<StationState, ClientError> {
        debug!(station_id = id, "Fetching station piles");
        let response = self
            .client
            .get(self.url(PILES_PATH))
            .query(&[("stationId", id)])
            .bearer_auth(token.as_str())
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ClientError::Status {
                endpoint: PILES_PATH,
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        Ok(codec::decode_station_state(&body)?)
    }

    async fn stations(
        &self,
        token: &AuthToken,
        position: Coordinates,
    ) -> Result<Vec<StationSummary>, ClientError> {
        debug!(%position, "Fetching station directory");
        let response = self
            .client
            .get(self.url(LIST_PATH))
            .query(&[
                ("longitude", position.longitude),
                ("latitude", position.latitude),
            ])
            .bearer_auth(token.as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                endpoint: LIST_PATH,
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        Ok(codec::decode_directory(&body)?)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
