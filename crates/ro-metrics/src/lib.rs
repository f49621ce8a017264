//! Prometheus exporter shared by the outreach binaries.
//!
//! Components record through the `metrics` facade; this crate only decides
//! where the scrape endpoint listens and makes sure it is installed once.

use std::env;
use std::sync::OnceLock;

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Resolves the exporter port from `raw`, falling back to `default_port` when
/// the value is missing, unparsable or zero.
pub fn resolve_port(raw: Option<&str>, default_port: u16) -> u16 {
    raw.map(str::trim)
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|port| *port != 0)
        .unwrap_or(default_port)
}

/// Initialize a Prometheus exporter listening on `0.0.0.0:<port>`.
///
/// The port comes from the environment variable named `port_env` or
/// `default_port`. Must be called from inside a tokio runtime. Returns the
/// handle of the installed recorder, if any.
pub fn init_metrics(port_env: &str, default_port: u16) -> Option<&'static PrometheusHandle> {
    if let Some(existing) = PROMETHEUS_HANDLE.get() {
        return Some(existing);
    }

    let port = resolve_port(env::var(port_env).ok().as_deref(), default_port);

    match PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install_recorder()
    {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
            describe_outreach_metrics();
            info!(metrics_port = port, "started prometheus exporter");
            PROMETHEUS_HANDLE.get()
        }
        Err(err) => {
            warn!(error = %err, metrics_port = port, "failed to start prometheus exporter");
            PROMETHEUS_HANDLE.get()
        }
    }
}

/// Current scrape output, or an empty string before [`init_metrics`] ran.
pub fn render() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

fn describe_outreach_metrics() {
    describe_counter!("outreach_calls_placed_total", "Calls accepted by the voice provider");
    describe_counter!("outreach_calls_failed_total", "Calls the voice provider rejected");
    describe_counter!(
        "outreach_batches_cancelled_total",
        "Batches cancelled by request or stale recovery"
    );
    describe_counter!("outreach_webhook_events_total", "Webhook events by outcome");
    describe_counter!(
        "outreach_webhook_errors_total",
        "Webhook events that failed to persist"
    );
    describe_counter!(
        "outreach_reconcile_moves_total",
        "Pipeline candidates moved by reconciliation"
    );
    describe_counter!(
        "outreach_reconcile_skipped_total",
        "Pipeline candidates reconciliation left alone"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_falls_back_on_bad_values() {
        assert_eq!(resolve_port(None, 9102), 9102);
        assert_eq!(resolve_port(Some("not-a-port"), 9102), 9102);
        assert_eq!(resolve_port(Some("0"), 9102), 9102);
        assert_eq!(resolve_port(Some("70000"), 9102), 9102);
    }

    #[test]
    fn port_from_env_value_is_trimmed() {
        assert_eq!(resolve_port(Some(" 9200 "), 9102), 9200);
    }

    #[test]
    fn render_is_empty_without_exporter() {
        if PROMETHEUS_HANDLE.get().is_none() {
            assert!(render().is_empty());
        }
    }
}
