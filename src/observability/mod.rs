//! Observability module for churnserve.
//!
//! Provides logging initialisation and the Prometheus metrics used by the
//! serving, registry and training paths.

use crate::config::ObservabilityConfig;
use crate::error::{ChurnError, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use ::tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Histogram buckets for request latency (in seconds).
pub const LATENCY_BUCKETS: [f64; 12] = [
    0.0001, // 100µs
    0.0005, // 500µs
    0.001,  // 1ms
    0.005,  // 5ms
    0.01,   // 10ms
    0.025,  // 25ms
    0.05,   // 50ms
    0.1,    // 100ms
    0.25,   // 250ms
    0.5,    // 500ms
    1.0,    // 1s
    5.0,    // 5s
];

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ChurnError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ChurnError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Install the Prometheus recorder. The returned handle renders the scrape
/// body served on `GET /metrics`.
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets(&LATENCY_BUCKETS)
        .map_err(|e| ChurnError::Internal(format!("Invalid histogram buckets: {}", e)))?
        .install_recorder()
        .map_err(|e| {
            ChurnError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

    register_metrics();
    Ok(handle)
}

/// Register standard metrics.
fn register_metrics() {
    counter!("churn_predictions_total").absolute(0);
    counter!("churn_prediction_errors_total").absolute(0);
    counter!("churn_registry_transitions_total").absolute(0);
    counter!("churn_model_reloads_total").absolute(0);
    counter!("churn_training_runs_total").absolute(0);
    gauge!("churn_model_active_loaded").set(0.0);
    gauge!("churn_model_canary_loaded").set(0.0);
    gauge!("churn_canary_traffic_percent").set(0.0);
}

/// Record a served prediction. `route` is `active`, `canary` or `batch`.
pub fn record_prediction(route: &str, latency: Duration) {
    counter!("churn_predictions_total", "route" => route.to_string()).increment(1);
    histogram!("churn_prediction_duration_seconds", "route" => route.to_string())
        .record(latency.as_secs_f64());
}

/// Record a failed prediction request.
pub fn record_prediction_error(kind: &str) {
    counter!("churn_prediction_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record a registry lifecycle transition.
pub fn record_transition(transition: &str) {
    counter!(
        "churn_registry_transitions_total",
        "transition" => transition.to_string()
    )
    .increment(1);
}

/// Update loaded-model gauges after a (re)load.
pub fn update_model_gauges(has_active: bool, has_canary: bool, canary_traffic_percent: u8) {
    gauge!("churn_model_active_loaded").set(if has_active { 1.0 } else { 0.0 });
    gauge!("churn_model_canary_loaded").set(if has_canary { 1.0 } else { 0.0 });
    gauge!("churn_canary_traffic_percent").set(canary_traffic_percent as f64);
}

/// Record a model reload.
pub fn record_reload() {
    counter!("churn_model_reloads_total").increment(1);
}

/// Record a completed training run.
pub fn record_training(model_type: &str, duration: Duration, accuracy: f64) {
    counter!("churn_training_runs_total", "model_type" => model_type.to_string()).increment(1);
    histogram!("churn_training_duration_seconds", "model_type" => model_type.to_string())
        .record(duration.as_secs_f64());
    gauge!("churn_training_last_accuracy", "model_type" => model_type.to_string()).set(accuracy);
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, route: &str, status: u16) {
    counter!(
        "churn_http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_series_are_keyed_by_route() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_prediction("canary", Duration::from_millis(3));
            record_prediction("canary", Duration::from_millis(4));
            record_prediction("batch", Duration::from_millis(9));
        });

        let rendered = handle.render();
        assert!(rendered.contains("churn_predictions_total{route=\"canary\"} 2"), "{}", rendered);
        assert!(rendered.contains("churn_predictions_total{route=\"batch\"} 1"), "{}", rendered);
        assert!(!rendered.contains("model_version"));
    }
}
