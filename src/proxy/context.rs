use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Outgoing response body type. The error side is `Infallible`: upstream
/// stream errors and client disconnects are handled by closing both ends
/// and stopping, not by propagating a body-level error.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, std::convert::Infallible>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request context that flows through the proxy pipeline, accumulating
/// byte counters for the traffic sink and emitting metrics at every exit
/// point.
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub client_ip: IpAddr,
    pub start: Instant,
    mirror_name: Mutex<String>,
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

impl RequestContext {
    pub fn new(method: String, path: String, client_ip: IpAddr) -> Self {
        Self {
            method,
            path,
            client_ip,
            start: Instant::now(),
            mirror_name: Mutex::new(String::new()),
            uploaded: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
        }
    }

    /// Record which mirror this request was routed to, once the selector
    /// has run. Read back by `finalize_metrics` for the `mirror` label.
    pub fn set_mirror(&self, name: String) {
        *self.mirror_name.lock().expect("mirror_name mutex poisoned") = name;
    }

    fn mirror_name(&self) -> String {
        self.mirror_name.lock().expect("mirror_name mutex poisoned").clone()
    }

    pub fn add_uploaded(&self, n: u64) {
        if n > 0 {
            self.uploaded.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn add_downloaded(&self, n: u64) {
        if n > 0 {
            self.downloaded.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Build an error response and record metrics in one place — the
    /// single exit point for transport-failure paths.
    pub fn error_response(&self, status: StatusCode, msg: &str) -> hyper::Response<BoxBody> {
        self.finalize_metrics(status.as_u16());

        hyper::Response::builder()
            .status(status)
            .header("content-type", "text/plain")
            .body(full_body(msg.to_string()))
            .unwrap()
    }

    /// Record final request metrics. Called exactly once per request on
    /// every exit path.
    pub fn finalize_metrics(&self, resp_status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(resp_status);

        let mirror_name = self.mirror_name();

        metrics::counter!(
            "mirrorgate_http_requests_total",
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
            "mirror" => mirror_name.clone(),
        )
        .increment(1);

        metrics::histogram!(
            "mirrorgate_http_request_duration_seconds",
            "mirror" => mirror_name.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());

        metrics::counter!("mirrorgate_bytes_uploaded_total", "mirror" => mirror_name.clone())
            .increment(self.uploaded_bytes());
        metrics::counter!("mirrorgate_bytes_downloaded_total", "mirror" => mirror_name)
            .increment(self.downloaded_bytes());
    }
}
