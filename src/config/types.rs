use serde::{Deserialize, Serialize};

/// Top-level proxy configuration: listen address, admin address,
/// health-check cadence, and the seed mirror list for standalone operation
/// without an external `MirrorStore` wired in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Mirrors known at startup. An empty list is valid — the proxy falls
    /// back to the synthetic Docker Hub mirror for every request.
    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            health_check: HealthCheckConfig::default(),
            mirrors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_admin_listen_addr")]
    pub admin_listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_listen_addr: default_admin_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_admin_listen_addr() -> String {
    "127.0.0.1:9901".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Seconds between sweeps. Defaults to 3600 (60 minutes).
    #[serde(default = "default_health_check_interval_secs")]
    pub interval_secs: u64,

    /// Per-probe timeout in seconds. Defaults to 5.
    #[serde(default = "default_health_check_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_check_interval_secs(),
            timeout_secs: default_health_check_timeout_secs(),
        }
    }
}

fn default_health_check_interval_secs() -> u64 {
    3600
}

fn default_health_check_timeout_secs() -> u64 {
    5
}

/// A seed mirror definition loaded from the config file. Converted to a
/// `MirrorRecord` by `ProxyConfig::seed_mirrors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub name: String,
    pub url: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub route_prefix: Option<String>,

    #[serde(default)]
    pub registry_type: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub is_default: bool,
}

fn default_enabled() -> bool {
    true
}
