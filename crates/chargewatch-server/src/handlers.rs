//! Daemon wiring and the status HTTP surface.
//!
//! Startup builds the upstream session, loads the station registry, creates
//! the poll engine and registers the configured watches. The HTTP server
//! exposes the engine read-only.

use crate::config::{Config, WatchConfig};
use crate::metrics::{self, MetricsSink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chargewatch_client::{HttpStatusSource, RateLimitedSession};
use chargewatch_core::{
    EngineError, HookError, Notice, Notifier, PollEngine, StationRegistry, SubscriptionState,
    ThresholdHook,
};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The poll engine.
    pub engine: Arc<PollEngine>,
}

/// Run the daemon until interrupted.
///
/// # Errors
///
/// Returns an error if the upstream session or the station registry cannot
/// be set up, or the status server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let source = HttpStatusSource::new(&config.upstream.host, config.credentials())
        .context("Failed to build upstream client")?;
    let session = Arc::new(RateLimitedSession::new(
        Arc::new(source),
        config.rate_limit_config(),
    ));

    let registry = StationRegistry::fetch(&session, config.coordinates())
        .await
        .context("Failed to load station directory")?;

    let engine = Arc::new(
        PollEngine::new(Arc::new(registry), session, config.engine_config())
            .with_sink(Arc::new(MetricsSink)),
    );

    register_watches(&engine, &config.watches).await;

    let state = Arc::new(AppState {
        engine: engine.clone(),
    });
    let app = router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Chargewatch status server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    info!("Chargewatch stopped");
    Ok(())
}

/// Build the status routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stations", get(stations_handler))
        .route("/stations/:key", get(station_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

/// Register a [`ThresholdHook`] per configured watch.
///
/// Invalid watches are skipped with a warning. Returns the number
/// registered.
pub async fn register_watches(engine: &PollEngine, watches: &[WatchConfig]) -> usize {
    let active = Arc::new(AtomicUsize::new(0));
    let mut registered = 0;

    for watch in watches {
        let duration = Duration::from_secs(watch.expire_minutes.saturating_mul(60));
        let subscription = match SubscriptionState::new(watch.threshold, duration) {
            Ok(s) => s,
            Err(e) => {
                warn!(station = %watch.station, error = %e, "Skipping invalid watch");
                continue;
            }
        };

        let notifier = Arc::new(LogNotifier {
            active: active.clone(),
        });
        let hook = Arc::new(ThresholdHook::new(subscription, notifier));

        // Count first: the cached-state replay may finish the watch at once.
        active.fetch_add(1, Ordering::SeqCst);
        match engine.register_hook(&watch.station, hook).await {
            Ok(()) => {
                registered += 1;
                info!(
                    station = %watch.station,
                    threshold = watch.threshold,
                    expire_minutes = watch.expire_minutes,
                    "Watch registered"
                );
            }
            Err(e) => {
                active.fetch_sub(1, Ordering::SeqCst);
                warn!(station = %watch.station, error = %e, "Skipping watch");
            }
        }
    }

    metrics::set_active_watches(active.load(Ordering::SeqCst));
    registered
}

/// Notifier that logs every notice.
struct LogNotifier {
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, station: &str, notice: &Notice) -> Result<(), HookError> {
        info!(station = %station, "{}", notice);
        metrics::record_notification(notice_kind(notice));

        if matches!(notice, Notice::Full | Notice::Expired) {
            let left = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            metrics::set_active_watches(left);
        }
        Ok(())
    }
}

fn notice_kind(notice: &Notice) -> &'static str {
    match notice {
        Notice::ThresholdReached { .. } => "threshold_reached",
        Notice::FreeCountChanged { .. } => "free_count_changed",
        Notice::Full => "full",
        Notice::Expired => "expired",
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::record_http_request("health");
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stations": state.engine.registry().len(),
    }))
}

/// Summary of one registered station.
#[derive(Debug, Serialize)]
struct StationEntry {
    station: String,
    id: i64,
    hooks: usize,
    polling: bool,
}

/// List every known station with its polling status.
async fn stations_handler(State(state): State<Arc<AppState>>) -> Json<Vec<StationEntry>> {
    metrics::record_http_request("stations");
    let engine = &state.engine;
    let mut entries = Vec::with_capacity(engine.registry().len());
    for (key, id) in engine.registry().iter() {
        entries.push(StationEntry {
            station: key.to_string(),
            id,
            hooks: engine.hook_count(key).await,
            polling: engine.is_polling(key).await,
        });
    }
    Json(entries)
}

/// Current state of one station.
#[derive(Debug, Serialize)]
struct StationView {
    station: String,
    free: usize,
    total: usize,
    piles: Vec<String>,
}

/// Report a station's state, from cache while fresh.
async fn station_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<StationView>, ApiError> {
    metrics::record_http_request("station");
    let current = state.engine.get_cached_state(&key).await?;
    Ok(Json(StationView {
        free: current.free_count(),
        total: current.total(),
        piles: current.piles.iter().map(|p| p.status.clone()).collect(),
        station: key,
    }))
}

/// Engine error mapped to an HTTP response.
#[derive(Debug)]
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::UnknownStation(_) => StatusCode::NOT_FOUND,
            EngineError::Client(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
