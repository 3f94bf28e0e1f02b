use super::state::AppState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Read-only admin surface: liveness, Prometheus scrape, and a JSON view of
/// the current mirror table (credentials never serialized).
pub async fn handle_admin(
    req: Request<Incoming>,
    state: AppState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        "/mirrors" => {
            let snapshot = state.registry.snapshot();
            let mirrors: Vec<serde_json::Value> = snapshot
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "id": m.id,
                        "name": m.name,
                        "url": m.url,
                        "enabled": m.enabled,
                        "selectable": m.is_selectable(),
                        "latency_ms": m.latency_ms,
                        "last_check": m.last_check,
                        "registry_type": m.registry_type,
                        "route_prefix": m.route_prefix,
                        "is_default": m.is_default,
                    })
                })
                .collect();

            let body = serde_json::to_string_pretty(&mirrors).unwrap_or_default();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}
