pub mod types;

pub use types::*;

use anyhow::Result;
use std::path::Path;

use crate::mirror::MirrorRecord;

impl ProxyConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used so the proxy can start with zero configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: ProxyConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            ProxyConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded proxy configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MIRRORGATE_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Ok(v) = std::env::var("MIRRORGATE_ADMIN_LISTEN_ADDR") {
            self.server.admin_listen_addr = v;
        }
        if let Ok(v) = std::env::var("MIRRORGATE_HEALTH_CHECK_INTERVAL_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.health_check.interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("MIRRORGATE_HEALTH_CHECK_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.health_check.timeout_secs = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("invalid server.listen_addr: {}", self.server.listen_addr);
        }
        if self
            .server
            .admin_listen_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            anyhow::bail!(
                "invalid server.admin_listen_addr: {}",
                self.server.admin_listen_addr
            );
        }
        if self.health_check.interval_secs == 0 {
            anyhow::bail!("health_check.interval_secs must be > 0");
        }
        for mirror in &self.mirrors {
            if mirror.name.is_empty() {
                anyhow::bail!("mirror entry missing a name");
            }
            if mirror.url.is_empty() {
                anyhow::bail!("mirror '{}' missing a url", mirror.name);
            }
        }
        Ok(())
    }

    /// Convert the configured seed mirrors into `MirrorRecord`s for loading
    /// into the default in-memory store at startup.
    pub fn seed_mirrors(&self) -> Vec<MirrorRecord> {
        self.mirrors
            .iter()
            .map(|m| {
                let mut record = MirrorRecord::new(&m.name, &m.url);
                record.enabled = m.enabled;
                record.is_default = m.is_default;
                if let Some(prefix) = &m.route_prefix {
                    record = record.with_route_prefix(prefix.clone());
                }
                if let Some(rt) = &m.registry_type {
                    record.registry_type = rt.clone();
                }
                if let (Some(user), Some(pass)) = (&m.username, &m.password) {
                    record = record.with_credentials(user.clone(), pass.clone());
                }
                record
            })
            .collect()
    }
}
