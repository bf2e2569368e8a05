//! Metrics collection and export for the chargewatch daemon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chargewatch_core::EventSink;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::error::Error;
use std::net::SocketAddr;
use tracing::{error, info, warn};

/// Metric names.
pub mod names {
    pub const ENGINE_ERRORS_TOTAL: &str = "chargewatch_engine_errors_total";
    pub const ENGINE_WARNINGS_TOTAL: &str = "chargewatch_engine_warnings_total";
    pub const NOTIFICATIONS_TOTAL: &str = "chargewatch_notifications_total";
    pub const WATCHES_ACTIVE: &str = "chargewatch_watches_active";
    pub const HTTP_REQUESTS_TOTAL: &str = "chargewatch_http_requests_total";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions given before a recorder is installed are dropped.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::ENGINE_ERRORS_TOTAL,
        "Poll and hook errors reported by the engine"
    );
    metrics::describe_counter!(
        names::ENGINE_WARNINGS_TOTAL,
        "Warnings reported by the engine"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Subscription notices delivered"
    );
    metrics::describe_gauge!(
        names::WATCHES_ACTIVE,
        "Configured watches that have not finished"
    );
    metrics::describe_counter!(
        names::HTTP_REQUESTS_TOTAL,
        "Requests served by the status endpoint"
    );

    info!("Metrics initialized");
}

/// Install the Prometheus recorder, serve it on `port` and describe the
/// metrics.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    init_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a delivered notice.
pub fn record_notification(kind: &'static str) {
    counter!(names::NOTIFICATIONS_TOTAL, "kind" => kind).increment(1);
}

/// Update the number of unfinished watches.
pub fn set_active_watches(count: usize) {
    gauge!(names::WATCHES_ACTIVE).set(count as f64);
}

/// Record a status endpoint request.
pub fn record_http_request(route: &'static str) {
    counter!(names::HTTP_REQUESTS_TOTAL, "route" => route).increment(1);
}

/// [`EventSink`] that logs engine events and counts them.
#[derive(Debug, Default)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn on_error(&self, error: &dyn Error, message: &str) {
        error!(error = %error, "{}", message);
        counter!(names::ENGINE_ERRORS_TOTAL).increment(1);
    }

    fn on_warning(&self, message: &str) {
        warn!("{}", message);
        counter!(names::ENGINE_WARNINGS_TOTAL).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions_reach_installed_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            init_metrics();
            MetricsSink.on_warning("Station 'North' (id 1) not found in refreshed data");
        });

        let rendered = handle.render();
        assert!(rendered.contains("# HELP chargewatch_engine_warnings_total"));
        assert!(rendered.contains("chargewatch_engine_warnings_total 1"));
    }

    #[test]
    fn test_sink_without_recorder() {
        // No recorder installed; recording must still be a no-op.
        let sink = MetricsSink;
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        sink.on_error(&err, "Error refreshing station 'North': boom");
        sink.on_warning("Station 'North' (id 1) not found in refreshed data");
        record_notification("full");
        set_active_watches(2);
    }
}
