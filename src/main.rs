#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use mirrorgate::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mirrorgate", about = "Transparent reverse proxy for OCI/Docker Registry V2 upstreams")]
struct Cli {
    /// Path to proxy config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listen address for the Registry V2 proxy
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    listen: String,

    /// Admin API listen address (healthz/metrics/mirrors)
    #[arg(long, default_value = "127.0.0.1:9901")]
    admin_listen: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
        admin_listen: cli.admin_listen,
    }))
}
