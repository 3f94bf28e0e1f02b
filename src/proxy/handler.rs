//! The Registry V2 request pipeline and the `/token` relay: prepare the
//! forwarded request → send it to the selected mirror → interpret the
//! status → produce a response → stream the body back.

use crate::auth::{build_basic, fetch_bearer, parse_challenge};
use crate::error::ProxyError;
use crate::mirror::Credentials;
use crate::proxy::context::{empty_body, full_body, BoxBody, RequestContext};
use crate::proxy::token;
use crate::selector::select_upstream;
use crate::server::state::AppState;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{Request, Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

static MANIFEST_PULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)/manifests/(.+)$").expect("valid regex"));

/// Build the shared upstream client. Constructed once at startup and reused
/// across every request. No request timeout is set — blob pulls stream
/// arbitrarily large bodies, so upstream transport timeouts are effectively
/// infinite for streaming bodies.
pub fn build_upstream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("failed to build upstream client")
}

pub async fn handle_request(
    req: Request<Incoming>,
    state: AppState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    if path == "/token" {
        if method != Method::GET {
            return Ok(Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(http::header::ALLOW, "GET")
                .body(full_body("method not allowed"))
                .unwrap());
        }
        return Ok(handle_token(req, &state, &query).await);
    }

    let Some(sub_path) = v2_subpath(&path) else {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full_body("not found"))
            .unwrap());
    };

    let ctx = Arc::new(RequestContext::new(
        method.to_string(),
        sub_path.to_string(),
        peer_addr.ip(),
    ));

    let incoming_headers = req.headers().clone();
    let proxy_host = incoming_headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let proxy_scheme = incoming_headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
        .to_string();

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("proxy: failed to read request body, error={}", e);
            return Ok(ctx.error_response(StatusCode::BAD_REQUEST, "failed to read request body"));
        }
    };
    ctx.add_uploaded(body_bytes.len() as u64);
    state.traffic.record_bytes(0, body_bytes.len() as u64).await;

    let sub_path = sub_path.to_string();
    Ok(handle_v2(
        &state,
        &ctx,
        method,
        &sub_path,
        query.as_deref(),
        incoming_headers,
        body_bytes,
        &proxy_scheme,
        &proxy_host,
    )
    .await)
}

/// Everything after `/v2/`, or `""` for the bare `/v2`/`/v2/` login probe.
/// `None` if the path is not under `/v2` at all.
fn v2_subpath(path: &str) -> Option<&str> {
    if path == "/v2" || path == "/v2/" {
        Some("")
    } else {
        path.strip_prefix("/v2/")
    }
}

fn prepare_forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut h = headers.clone();
    h.remove(http::header::HOST);
    h.remove(http::header::CONTENT_LENGTH);
    h
}

async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, reqwest::Error> {
    client.request(method, url).headers(headers).body(body).send().await
}

async fn handle_v2(
    state: &AppState,
    ctx: &Arc<RequestContext>,
    method: Method,
    sub_path: &str,
    query: Option<&str>,
    headers: HeaderMap,
    body: Bytes,
    proxy_scheme: &str,
    proxy_host: &str,
) -> Response<BoxBody> {
    let selection = select_upstream(&state.registry.snapshot(), sub_path);
    let mirror = selection.mirror;
    ctx.set_mirror(mirror.name.clone());

    let base = mirror.base_url();
    let mut url = if selection.adjusted_path.is_empty() {
        format!("{base}/v2/")
    } else {
        format!("{base}/v2/{}", selection.adjusted_path)
    };
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }

    let forward_headers = prepare_forward_headers(&headers);

    let first = match send(&state.upstream_client, method.clone(), &url, forward_headers.clone(), body.clone()).await {
        Ok(resp) => resp,
        Err(e) => {
            metrics::counter!("mirrorgate_upstream_transport_errors_total", "mirror" => mirror.name.clone()).increment(1);
            return ctx.error_response(StatusCode::BAD_GATEWAY, &ProxyError::from(e).to_string());
        }
    };

    let resp = if first.status() == StatusCode::UNAUTHORIZED {
        match handle_unauthorized(
            state,
            &method,
            &url,
            &forward_headers,
            &body,
            mirror.credentials.as_ref(),
            first,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!("mirrorgate_upstream_transport_errors_total", "mirror" => mirror.name.clone()).increment(1);
                return ctx.error_response(StatusCode::BAD_GATEWAY, &ProxyError::from(e).to_string());
            }
        }
    } else {
        first
    };

    if method == Method::GET {
        if let Some(caps) = MANIFEST_PULL.captures(sub_path) {
            let image = caps[1].to_string();
            let reference = caps[2].to_string();
            let client_ip = ctx.client_ip;
            let sink = state.traffic.clone();
            sink.record_pull(&image, &reference, client_ip).await;
            metrics::counter!("mirrorgate_pulls_total", "mirror" => mirror.name.clone()).increment(1);
            info!(image = %image, reference = %reference, "proxy: logged pull");
        }
    }

    build_downstream_response(ctx, &method, state, resp, proxy_scheme, proxy_host).await
}

/// Handle a 401 response from the selected mirror. Returns the response
/// that should be surfaced to the client: either a retry's response, a
/// replay of the original request, or the original 401 unchanged.
async fn handle_unauthorized(
    state: &AppState,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: &Bytes,
    creds: Option<&Credentials>,
    first: reqwest::Response,
) -> Result<reqwest::Response, reqwest::Error> {
    let challenge_header = first
        .headers()
        .get(http::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(challenge_header) = challenge_header else {
        return Ok(first);
    };

    if challenge_header.contains("Bearer") {
        drop(first);
        let challenge = parse_challenge(&challenge_header);
        let token = match &challenge.realm {
            Some(realm) => {
                fetch_bearer(
                    &state.upstream_client,
                    realm,
                    challenge.service.as_deref(),
                    challenge.scope.as_deref(),
                    creds,
                )
                .await
            }
            None => None,
        };

        match token {
            Some(tok) => {
                metrics::counter!("mirrorgate_upstream_retries_total").increment(1);
                let mut retry_headers = headers.clone();
                retry_headers.insert(
                    http::header::AUTHORIZATION,
                    format!("Bearer {tok}").parse().expect("valid header value"),
                );
                send(&state.upstream_client, method.clone(), url, retry_headers, body.clone()).await
            }
            None => {
                warn!("proxy: upstream token fetch failed, replaying original request");
                send(&state.upstream_client, method.clone(), url, headers.clone(), body.clone()).await
            }
        }
    } else if challenge_header.contains("Basic") {
        match creds {
            Some(creds) => {
                drop(first);
                metrics::counter!("mirrorgate_upstream_retries_total").increment(1);
                let mut retry_headers = headers.clone();
                retry_headers.insert(
                    http::header::AUTHORIZATION,
                    build_basic(creds).parse().expect("valid header value"),
                );
                send(&state.upstream_client, method.clone(), url, retry_headers, body.clone()).await
            }
            None => Ok(first),
        }
    } else {
        Ok(first)
    }
}

/// Copy upstream status/headers into a client response, rewriting any
/// `Www-Authenticate` realm and stripping `Content-Encoding`/`Content-Length`
/// as needed, then hand the streaming body off to `stream_body`. Records
/// the traffic sink's per-request count exactly once here, regardless of
/// how many chunks the response body streams as.
async fn build_downstream_response(
    ctx: &Arc<RequestContext>,
    method: &Method,
    state: &AppState,
    upstream: reqwest::Response,
    proxy_scheme: &str,
    proxy_host: &str,
) -> Response<BoxBody> {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    headers.remove(http::header::CONTENT_ENCODING);
    if *method != Method::HEAD {
        headers.remove(http::header::CONTENT_LENGTH);
    }

    if let Some(www_auth) = headers
        .get(http::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    {
        let rewritten = token::rewrite_www_authenticate(&www_auth, proxy_scheme, proxy_host);
        if let Ok(value) = rewritten.parse() {
            headers.insert(http::header::WWW_AUTHENTICATE, value);
        }
    }

    let body = if *method == Method::HEAD {
        empty_body()
    } else {
        stream_body(ctx.clone(), state.traffic.clone(), upstream)
    };

    let mut builder = Response::builder().status(status);
    *builder.headers_mut().unwrap() = headers;
    let resp = builder.body(body).unwrap();
    ctx.finalize_metrics(status.as_u16());
    state.traffic.record_request().await;
    resp
}

/// Stream upstream chunks to the client, accounting bytes into `ctx` and
/// the traffic sink as they pass through. Stops the stream on the first
/// transport error — no retry, no partial-chunk buffering.
fn stream_body(
    ctx: Arc<RequestContext>,
    traffic: Arc<dyn crate::traffic::TrafficSink>,
    upstream: reqwest::Response,
) -> BoxBody {
    use futures_util::StreamExt;

    let stream = upstream.bytes_stream().take_while(|r| {
        let ok = r.is_ok();
        async move { ok }
    }).then(move |chunk| {
        let ctx = ctx.clone();
        let traffic = traffic.clone();
        async move {
            let bytes = chunk.expect("filtered by take_while");
            ctx.add_downloaded(bytes.len() as u64);
            traffic.record_bytes(bytes.len() as u64, 0).await;
            Ok::<Frame<Bytes>, Infallible>(Frame::data(bytes))
        }
    });

    StreamBody::new(stream).boxed()
}

async fn handle_token(
    req: Request<Incoming>,
    state: &AppState,
    query: &Option<String>,
) -> Response<BoxBody> {
    let params = query
        .as_deref()
        .map(parse_query)
        .unwrap_or_default();

    let upstream_realm = params.iter().find(|(k, _)| k == "_upstream_realm").map(|(_, v)| v.as_str());
    let url = token::resolve_upstream_realm(upstream_realm);

    let mut forward_params: Vec<(String, String)> = params
        .into_iter()
        .filter(|(k, _)| k != "_upstream_realm")
        .collect();
    forward_params.sort();

    let headers = prepare_forward_headers(req.headers());
    // A /token relay only accepts GET; the incoming body is drained but
    // never forwarded.
    let _ = req.into_body().collect().await;

    let client = &state.upstream_client;
    let mut request = client.get(&url).headers(headers);
    for (k, v) in &forward_params {
        request = request.query(&[(k.as_str(), v.as_str())]);
    }

    let ctx = RequestContext::new(
        "GET".to_string(),
        "/token".to_string(),
        std::net::IpAddr::from([0, 0, 0, 0]),
    );

    match request.send().await {
        Ok(resp) => {
            let status = resp.status();
            let mut headers = resp.headers().clone();
            headers.remove(http::header::CONTENT_LENGTH);
            headers.remove(http::header::CONTENT_ENCODING);
            let bytes = resp.bytes().await.unwrap_or_default();
            ctx.finalize_metrics(status.as_u16());

            let mut builder = Response::builder().status(status);
            *builder.headers_mut().unwrap() = headers;
            builder.body(full_body(bytes)).unwrap()
        }
        Err(e) => ctx.error_response(StatusCode::BAD_GATEWAY, &ProxyError::from(e).to_string()),
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (
                percent_encoding::percent_decode_str(k).decode_utf8_lossy().into_owned(),
                percent_encoding::percent_decode_str(v).decode_utf8_lossy().into_owned(),
            ),
            None => (
                percent_encoding::percent_decode_str(pair).decode_utf8_lossy().into_owned(),
                String::new(),
            ),
        })
        .collect()
}
