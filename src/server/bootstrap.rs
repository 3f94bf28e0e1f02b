use crate::config::ProxyConfig;
use crate::health;
use crate::mirror::{InMemoryMirrorStore, MirrorRegistry};
use crate::metrics::Metrics;
use crate::proxy::build_upstream_client;
use crate::server::{self, AppState};
use crate::traffic::InMemoryTrafficSink;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Proxy lifecycle: init → load config → seed mirrors → eager probe →
/// serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = ProxyConfig::load(&args.config_path)?;
    let probe_timeout = std::time::Duration::from_secs(config.health_check.timeout_secs);
    let sweep_interval = std::time::Duration::from_secs(config.health_check.interval_secs);

    let store = Arc::new(InMemoryMirrorStore::from_records(config.seed_mirrors()));
    let registry = MirrorRegistry::new(store);
    registry.refresh().await;

    let metrics = Metrics::install();
    let upstream_client = build_upstream_client();
    let probe_client = health::build_probe_client(probe_timeout);

    let state = AppState {
        registry: registry.clone(),
        traffic: Arc::new(InMemoryTrafficSink::default()),
        upstream_client,
        metrics,
    };

    // Eager probe so the proxy does not start with every mirror marked
    // unreachable.
    health::probe_all(&registry, &probe_client, probe_timeout).await;

    let shutdown = Arc::new(Notify::new());

    tokio::spawn({
        let registry = registry.clone();
        let probe_client = probe_client.clone();
        let shutdown = shutdown.clone();
        async move {
            health::run_sweep_loop(registry, probe_client, sweep_interval, probe_timeout, shutdown).await
        }
    });

    {
        let state = state.clone();
        let admin_addr = args.admin_listen.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_admin_server(&admin_addr, state).await {
                tracing::error!("server: admin failed, error={}", e);
            }
        });
    }

    tracing::info!("server: starting proxy, listen={}", args.listen);

    let proxy_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
