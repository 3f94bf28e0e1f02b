use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Safe to call more than once per process (e.g. from
    /// multiple integration test binaries sharing one process) — only the
    /// first call actually installs the recorder; later calls return a
    /// clone of the same handle.
    pub fn install() -> Self {
        if let Some(handle) = HANDLE.get() {
            return Self {
                handle: handle.clone(),
            };
        }

        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        let _ = HANDLE.set(handle.clone());

        describe_counter!(
            "mirrorgate_http_requests_total",
            Unit::Count,
            "Total proxied Registry V2 requests processed"
        );
        describe_histogram!(
            "mirrorgate_http_request_duration_seconds",
            Unit::Seconds,
            "Total request duration from client perspective"
        );
        describe_counter!(
            "mirrorgate_bytes_uploaded_total",
            Unit::Bytes,
            "Total request body bytes forwarded upstream"
        );
        describe_counter!(
            "mirrorgate_bytes_downloaded_total",
            Unit::Bytes,
            "Total response body bytes streamed to clients"
        );
        describe_counter!(
            "mirrorgate_upstream_retries_total",
            Unit::Count,
            "Total 401-triggered retry attempts against a mirror"
        );
        describe_counter!(
            "mirrorgate_upstream_transport_errors_total",
            Unit::Count,
            "Total transport failures while proxying to a mirror"
        );
        describe_counter!(
            "mirrorgate_pulls_total",
            Unit::Count,
            "Total manifest pull events logged to the traffic sink"
        );

        describe_gauge!(
            "mirrorgate_upstream_health_status",
            Unit::Count,
            "Mirror health: 1=reachable 0=unreachable"
        );
        describe_counter!(
            "mirrorgate_health_check_total",
            Unit::Count,
            "Total health probe attempts"
        );

        describe_gauge!(
            "mirrorgate_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "mirrorgate_connections_total",
            Unit::Count,
            "Total connections accepted"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
