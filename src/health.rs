//! Upstream health/latency tracker.
//!
//! Probes every configured mirror concurrently and writes the measured
//! latency back through the `MirrorStore`, then refreshes the selector's
//! snapshot. There is no healthy/unhealthy threshold state machine here —
//! a mirror is simply reachable or not on each probe, and the store
//! reflects that directly.

use crate::mirror::{Credentials, MirrorRecord, MirrorRegistry, UNREACHABLE};
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default interval between sweeps, used when no configuration is supplied.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Default per-probe connect+read timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on concurrent in-flight probes within one sweep.
const PROBE_CONCURRENCY: usize = 16;

/// Build the shared client used for latency probes. Redirects are followed
/// and per-request timeouts are set explicitly per probe.
pub fn build_probe_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .expect("failed to build health probe client")
}

/// Probe a single mirror's `/v2/` endpoint and classify reachability.
///
/// GET `<mirror.url>/v2/`, HTTP Basic auth attached when credentials are
/// configured. 200 or 401 counted as reachable (401 means the endpoint
/// exists and is answering, just gated), anything else — including
/// transport failure — counted unreachable.
pub async fn probe(client: &reqwest::Client, mirror: &MirrorRecord, timeout: Duration) -> u32 {
    let url = format!("{}/v2/", mirror.base_url());
    let started = Instant::now();

    let mut req = client.get(&url).timeout(timeout);
    if let Some(creds) = &mirror.credentials {
        req = req.basic_auth(&creds.username, Some(creds_password(creds)));
    }

    let result = req.send().await;
    match result {
        Ok(resp)
            if resp.status() == reqwest::StatusCode::OK
                || resp.status() == reqwest::StatusCode::UNAUTHORIZED =>
        {
            let elapsed = started.elapsed();
            elapsed.as_millis().min(u128::from(UNREACHABLE - 1)) as u32
        }
        Ok(_) | Err(_) => UNREACHABLE,
    }
}

fn creds_password(creds: &Credentials) -> &str {
    creds.expose_password()
}

/// Probe every mirror in `registry`'s current snapshot, bounded to
/// `PROBE_CONCURRENCY` in flight at once, writing each result back through
/// the store, then refresh the snapshot once all probes complete.
pub async fn probe_all(registry: &MirrorRegistry, client: &reqwest::Client, timeout: Duration) {
    let mirrors = registry.snapshot();
    if mirrors.is_empty() {
        return;
    }

    let store = registry.store().clone();
    stream::iter(mirrors.iter().cloned())
        .map(|mirror| {
            let client = client.clone();
            let store = store.clone();
            async move {
                let latency_ms = probe(&client, &mirror, timeout).await;
                let reachable = latency_ms < UNREACHABLE;
                if reachable {
                    debug!(mirror = %mirror.name, latency_ms, "health: probe reachable");
                } else {
                    warn!(mirror = %mirror.name, "health: probe unreachable");
                }
                metrics::gauge!("mirrorgate_upstream_health_status", "mirror" => mirror.name.clone())
                    .set(if reachable { 1.0 } else { 0.0 });
                metrics::counter!(
                    "mirrorgate_health_check_total",
                    "mirror" => mirror.name.clone(),
                    "result" => if reachable { "success" } else { "failure" },
                )
                .increment(1);

                // Disable mirrors that failed this probe, re-enable those
                // that recovered.
                store
                    .update_health(&mirror.id, latency_ms, chrono::Utc::now(), reachable)
                    .await;
            }
        })
        .buffer_unordered(PROBE_CONCURRENCY)
        .collect::<()>()
        .await;

    registry.refresh().await;
}

/// Run `probe_all` immediately, then every `interval` thereafter, until
/// `shutdown` is notified. A single `AtomicBool` guard drops an overlapping
/// tick rather than queuing it.
pub async fn run_sweep_loop(
    registry: MirrorRegistry,
    client: reqwest::Client,
    interval: Duration,
    timeout: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) {
    let in_progress = Arc::new(AtomicBool::new(false));
    loop {
        if in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            probe_all(&registry, &client, timeout).await;
            in_progress.store(false, Ordering::SeqCst);
        } else {
            debug!("health: sweep already in progress, skipping this tick");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{InMemoryMirrorStore, MirrorRegistry};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn probe_classifies_200_as_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = build_probe_client(DEFAULT_PROBE_TIMEOUT);
        let mirror = MirrorRecord::new("m", server.uri());
        let latency = probe(&client, &mirror, DEFAULT_PROBE_TIMEOUT).await;
        assert!(latency < UNREACHABLE);
    }

    #[tokio::test]
    async fn probe_classifies_401_as_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = build_probe_client(DEFAULT_PROBE_TIMEOUT);
        let mirror = MirrorRecord::new("m", server.uri());
        let latency = probe(&client, &mirror, DEFAULT_PROBE_TIMEOUT).await;
        assert!(latency < UNREACHABLE);
    }

    #[tokio::test]
    async fn probe_classifies_500_as_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = build_probe_client(DEFAULT_PROBE_TIMEOUT);
        let mirror = MirrorRecord::new("m", server.uri());
        let latency = probe(&client, &mirror, DEFAULT_PROBE_TIMEOUT).await;
        assert_eq!(latency, UNREACHABLE);
    }

    #[tokio::test]
    async fn probe_classifies_connection_failure_as_unreachable() {
        let client = build_probe_client(DEFAULT_PROBE_TIMEOUT);
        let mirror = MirrorRecord::new("m", "http://127.0.0.1:1");
        let latency = probe(&client, &mirror, DEFAULT_PROBE_TIMEOUT).await;
        assert_eq!(latency, UNREACHABLE);
    }

    #[tokio::test]
    async fn probe_all_writes_back_and_refreshes_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = InMemoryMirrorStore::new();
        let mirror = MirrorRecord::new("m", server.uri());
        let id = mirror.id.clone();
        store.insert(mirror);

        let registry = MirrorRegistry::new(Arc::new(store));
        registry.refresh().await;

        let client = build_probe_client(DEFAULT_PROBE_TIMEOUT);
        probe_all(&registry, &client, DEFAULT_PROBE_TIMEOUT).await;

        let updated = registry
            .snapshot()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .expect("mirror present");
        assert!(updated.latency_ms < UNREACHABLE);
        assert!(updated.last_check.is_some());
    }

    #[tokio::test]
    async fn probe_all_disables_unreachable_and_reenables_recovered() {
        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&down)
            .await;

        let up = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&up)
            .await;

        let store = InMemoryMirrorStore::new();
        let mut bad = MirrorRecord::new("bad", down.uri());
        bad.enabled = true;
        let bad_id = bad.id.clone();
        store.insert(bad);

        let mut recovering = MirrorRecord::new("recovering", up.uri());
        recovering.enabled = false;
        let recovering_id = recovering.id.clone();
        store.insert(recovering);

        let registry = MirrorRegistry::new(Arc::new(store));
        registry.refresh().await;

        let client = build_probe_client(DEFAULT_PROBE_TIMEOUT);
        probe_all(&registry, &client, DEFAULT_PROBE_TIMEOUT).await;

        let snapshot = registry.snapshot();
        let bad = snapshot.iter().find(|m| m.id == bad_id).unwrap();
        let recovering = snapshot.iter().find(|m| m.id == recovering_id).unwrap();
        assert!(!bad.enabled);
        assert!(recovering.enabled);
    }
}
