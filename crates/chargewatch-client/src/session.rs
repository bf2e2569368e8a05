//! Rate-limited, self-authenticating access to a [`StatusSource`].
//!
//! Every upstream call goes through [`RateLimitedSession::throttle`], which
//! enforces two limits at once:
//!
//! - at most `max_requests` calls may begin within any trailing `window`
//! - consecutive calls begin at least `min_interval` apart
//!
//! The session logs in lazily, logs in again once the token is older than
//! `reauth_interval`, and drops the token after `max_consecutive_errors`
//! failed calls in a row so the next call starts from a fresh login.

use chargewatch_protocol::{Coordinates, StationId, StationState, StationSummary};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::traits::{AuthToken, ClientError, StatusSource};

/// Limits applied by a [`RateLimitedSession`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum gap between the starts of two requests.
    pub min_interval: Duration,
    /// Maximum requests started within one `window`.
    pub max_requests: usize,
    /// Length of the rolling request window.
    pub window: Duration,
    /// Age after which a session token is renewed.
    pub reauth_interval: Duration,
    /// Consecutive failures that invalidate the current session.
    pub max_consecutive_errors: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_requests: 15,
            window: Duration::from_secs(60),
            reauth_interval: Duration::from_secs(24 * 60 * 60),
            max_consecutive_errors: 5,
        }
    }
}

/// Request start times plus the failure streak, guarded by one lock.
#[derive(Debug, Default)]
struct ThrottleState {
    window: VecDeque<Instant>,
    consecutive_errors: u32,
}

impl ThrottleState {
    /// Drop request times that have left the window.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.window.front() {
            if now.duration_since(oldest) >= window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long a request arriving at `now` must wait, or `None` to admit it.
    fn admission_delay(&self, now: Instant, config: &RateLimitConfig) -> Option<Duration> {
        if self.window.len() >= config.max_requests {
            let oldest = self.window.front()?;
            return Some((*oldest + config.window).saturating_duration_since(now));
        }
        let latest = self.window.back()?;
        let ready = *latest + config.min_interval;
        (ready > now).then(|| ready - now)
    }
}

#[derive(Debug)]
struct SessionToken {
    token: AuthToken,
    obtained_at: Instant,
}

/// Authenticated, throttled session over a [`StatusSource`].
pub struct RateLimitedSession {
    source: Arc<dyn StatusSource>,
    config: RateLimitConfig,
    throttle: Mutex<ThrottleState>,
    auth: Mutex<Option<SessionToken>>,
}

impl RateLimitedSession {
    /// Create a session with custom limits.
    #[must_use]
    pub fn new(source: Arc<dyn StatusSource>, mut config: RateLimitConfig) -> Self {
        config.max_requests = config.max_requests.max(1);
        config.max_consecutive_errors = config.max_consecutive_errors.max(1);
        info!(source = source.name(), "Creating rate-limited session with config: {:?}", config);
        Self {
            source,
            config,
            throttle: Mutex::new(ThrottleState::default()),
            auth: Mutex::new(None),
        }
    }

    /// Create a session with the default limits.
    #[must_use]
    pub fn with_defaults(source: Arc<dyn StatusSource>) -> Self {
        Self::new(source, RateLimitConfig::default())
    }

    /// Get the configured limits.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Return a valid token, logging in first if there is none or the
    /// current one is older than the re-auth interval.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Auth`] if the login exchange fails.
    pub async fn ensure_authenticated(&self) -> Result<AuthToken, ClientError> {
        let mut auth = self.auth.lock().await;
        if let Some(current) = auth.as_ref() {
            if current.obtained_at.elapsed() < self.config.reauth_interval {
                return Ok(current.token.clone());
            }
            debug!("Session token expired, logging in again");
        }

        let token = self.source.login().await.map_err(|e| match e {
            ClientError::Auth(_) => e,
            other => ClientError::Auth(other.to_string()),
        })?;
        *auth = Some(SessionToken {
            token: token.clone(),
            obtained_at: Instant::now(),
        });
        Ok(token)
    }

    /// Drop the current session so the next call logs in again.
    pub async fn invalidate(&self) {
        if self.auth.lock().await.take().is_some() {
            debug!("Session invalidated");
        }
    }

    /// Wait until a request may begin, then record its start.
    ///
    /// Returns the total time spent waiting.
    ///
    /// # Cancel Safety
    ///
    /// The lock is released while sleeping and the start time is recorded
    /// only on admission, so dropping the future leaves no trace.
    pub async fn throttle(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let delay = {
                let mut state = self.throttle.lock().await;
                let now = Instant::now();
                state.prune(now, self.config.window);
                match state.admission_delay(now, &self.config) {
                    None => {
                        state.window.push_back(now);
                        return waited;
                    }
                    Some(delay) => delay,
                }
            };

            trace!(wait = ?delay, "Rate limited");
            tokio::time::sleep(delay).await;
            waited += delay;
        }
    }

    /// Fetch the pile states of one station.
    ///
    /// # Errors
    ///
    /// Returns the login or upstream error.
    pub async fn fetch_station_state(&self, id: StationId) -> Result<StationState, ClientError> {
        self.request("station_state", |token| async move {
            self.source.station_state(&token, id).await
        })
        .await
    }

    /// List the stations around a position.
    ///
    /// # Errors
    ///
    /// Returns the login or upstream error.
    pub async fn fetch_stations(
        &self,
        position: Coordinates,
    ) -> Result<Vec<StationSummary>, ClientError> {
        self.request("stations", |token| async move {
            self.source.stations(&token, position).await
        })
        .await
    }

    /// Bulk refresh: the station directory indexed by station id.
    ///
    /// # Errors
    ///
    /// Returns the login or upstream error.
    pub async fn fetch_all_states(
        &self,
        position: Coordinates,
    ) -> Result<HashMap<StationId, StationSummary>, ClientError> {
        let stations = self.fetch_stations(position).await?;
        Ok(stations.into_iter().map(|s| (s.id, s)).collect())
    }

    /// Current length of the failure streak.
    pub async fn consecutive_errors(&self) -> u32 {
        self.throttle.lock().await.consecutive_errors
    }

    /// Number of requests started within the trailing window.
    pub async fn requests_in_window(&self) -> usize {
        let mut state = self.throttle.lock().await;
        state.prune(Instant::now(), self.config.window);
        state.window.len()
    }

    /// Throttle, authenticate, call, then update the failure streak.
    async fn request<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, ClientError>
    where
        F: FnOnce(AuthToken) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.throttle().await;
        let token = self.ensure_authenticated().await?;

        let result = call(token).await;
        let invalidate = {
            let mut state = self.throttle.lock().await;
            match &result {
                Ok(_) => {
                    state.consecutive_errors = 0;
                    false
                }
                Err(e) => {
                    state.consecutive_errors += 1;
                    warn!(
                        operation,
                        error = %e,
                        streak = state.consecutive_errors,
                        "Upstream request failed"
                    );
                    if state.consecutive_errors >= self.config.max_consecutive_errors {
                        state.consecutive_errors = 0;
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if invalidate {
            error!(operation, "Multiple consecutive errors, forcing re-login");
            self.invalidate().await;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted upstream that records when each station call began.
    #[derive(Default)]
    struct FakeSource {
        logins: AtomicUsize,
        fail_logins: bool,
        fail_calls: AtomicUsize,
        starts: std::sync::Mutex<Vec<Instant>>,
    }

    impl FakeSource {
        fn failing(calls: usize) -> Self {
            let source = Self::default();
            source.fail_calls.store(calls, Ordering::SeqCst);
            source
        }

        fn starts(&self) -> Vec<Instant> {
            self.starts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusSource for FakeSource {
        async fn login(&self) -> Result<AuthToken, ClientError> {
            if self.fail_logins {
                return Err(ClientError::Status {
                    endpoint: "/login",
                    status: 500,
                });
            }
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AuthToken::new(format!("token-{}", n)))
        }

        async fn station_state(
            &self,
            _token: &AuthToken,
            _id: StationId,
        ) -> Result<StationState, ClientError> {
            self.starts.lock().unwrap().push(Instant::now());
            let remaining = self.fail_calls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_calls.store(remaining - 1, Ordering::SeqCst);
                return Err(ClientError::Status {
                    endpoint: "/piles",
                    status: 503,
                });
            }
            Ok(StationState::with_counts(1, 2))
        }

        async fn stations(
            &self,
            _token: &AuthToken,
            _position: Coordinates,
        ) -> Result<Vec<StationSummary>, ClientError> {
            Ok(vec![
                StationSummary::new(1, "East"),
                StationSummary::new(2, "West"),
            ])
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn session_with(source: Arc<FakeSource>, config: RateLimitConfig) -> RateLimitedSession {
        RateLimitedSession::new(source, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_between_requests() {
        let source = Arc::new(FakeSource::default());
        let session = session_with(source.clone(), RateLimitConfig::default());

        for _ in 0..4 {
            session.fetch_station_state(1).await.unwrap();
        }

        let starts = source.starts();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_cap_delays_sixteenth_request() {
        let source = Arc::new(FakeSource::default());
        let config = RateLimitConfig {
            min_interval: Duration::ZERO,
            ..RateLimitConfig::default()
        };
        let session = session_with(source.clone(), config);

        for _ in 0..16 {
            session.fetch_station_state(1).await.unwrap();
        }

        let starts = source.starts();
        assert_eq!(starts.len(), 16);
        assert!(starts[14] - starts[0] < Duration::from_secs(1));
        assert!(starts[15] - starts[0] >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_respect_both_limits() {
        let source = Arc::new(FakeSource::default());
        let session = Arc::new(session_with(source.clone(), RateLimitConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session.fetch_station_state(1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut starts = source.starts();
        starts.sort();
        assert_eq!(starts.len(), 20);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
        for (i, start) in starts.iter().enumerate() {
            let in_window = starts[i..]
                .iter()
                .take_while(|t| **t - *start < Duration::from_secs(60))
                .count();
            assert!(in_window <= 15);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_after_consecutive_failures() {
        let source = Arc::new(FakeSource::failing(5));
        let session = session_with(source.clone(), RateLimitConfig::default());

        for _ in 0..4 {
            assert!(session.fetch_station_state(1).await.is_err());
        }
        assert_eq!(session.consecutive_errors().await, 4);
        assert_eq!(source.logins.load(Ordering::SeqCst), 1);

        // The fifth failure drops the session and resets the streak.
        assert!(session.fetch_station_state(1).await.is_err());
        assert_eq!(session.consecutive_errors().await, 0);
        assert_eq!(source.logins.load(Ordering::SeqCst), 1);

        session.fetch_station_state(1).await.unwrap();
        assert_eq!(source.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_streak() {
        let source = Arc::new(FakeSource::failing(3));
        let session = session_with(source.clone(), RateLimitConfig::default());

        for _ in 0..3 {
            assert!(session.fetch_station_state(1).await.is_err());
        }
        session.fetch_station_state(1).await.unwrap();
        assert_eq!(session.consecutive_errors().await, 0);

        source.fail_calls.store(4, Ordering::SeqCst);
        for _ in 0..4 {
            assert!(session.fetch_station_state(1).await.is_err());
        }
        // Streak restarted at zero, so no forced re-login yet.
        assert_eq!(source.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reauth_after_interval() {
        let source = Arc::new(FakeSource::default());
        let session = session_with(source.clone(), RateLimitConfig::default());

        let first = session.ensure_authenticated().await.unwrap();
        let again = session.ensure_authenticated().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(source.logins.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(24 * 60 * 60 + 1)).await;
        let renewed = session.ensure_authenticated().await.unwrap();
        assert_ne!(first, renewed);
        assert_eq!(source.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_failure_is_auth_error() {
        let source = Arc::new(FakeSource {
            fail_logins: true,
            ..FakeSource::default()
        });
        let session = session_with(source.clone(), RateLimitConfig::default());

        match session.fetch_station_state(1).await {
            Err(ClientError::Auth(_)) => {}
            other => panic!("Expected Auth error, got {:?}", other),
        }
        assert!(source.starts().is_empty());
        assert_eq!(session.consecutive_errors().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_states_indexes_by_id() {
        let source = Arc::new(FakeSource::default());
        let session = session_with(source, RateLimitConfig::default());

        let all = session
            .fetch_all_states(Coordinates::new(116.3, 39.9))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&2].station_name, "West");
        assert_eq!(session.requests_in_window().await, 1);
    }

    #[test]
    fn test_admission_delay() {
        let config = RateLimitConfig {
            max_requests: 2,
            ..RateLimitConfig::default()
        };
        let start = Instant::now();
        let mut state = ThrottleState::default();
        assert_eq!(state.admission_delay(start, &config), None);

        state.window.push_back(start);
        assert_eq!(
            state.admission_delay(start + Duration::from_secs(2), &config),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            state.admission_delay(start + Duration::from_secs(5), &config),
            None
        );

        state.window.push_back(start + Duration::from_secs(5));
        assert_eq!(
            state.admission_delay(start + Duration::from_secs(10), &config),
            Some(Duration::from_secs(50))
        );

        state.prune(start + Duration::from_secs(60), config.window);
        assert_eq!(state.window.len(), 1);
    }
}
