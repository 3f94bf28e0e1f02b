use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// Sentinel latency value signifying an unreachable mirror. Used for
/// ordering so unreachable mirrors sort last and are excluded by the
/// `< UNREACHABLE` selectability predicate.
pub const UNREACHABLE: u32 = 9999;

/// Upstream credentials stored on a mirror record.
///
/// `password` is wrapped in `SecretString` so it never leaks into `Debug`
/// output or accidental `tracing` field capture.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Durable record describing one configured upstream registry mirror.
///
/// This type only carries the fields the proxy core reads; persistence,
/// traffic counters and pull history live behind the `MirrorStore` /
/// `TrafficSink` traits.
#[derive(Clone, Debug)]
pub struct MirrorRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub latency_ms: u32,
    pub last_check: Option<DateTime<Utc>>,
    /// Advisory tag (e.g. "dockerhub", "ghcr"), surfaced on the admin
    /// endpoint. Never branched on by core selection/proxy logic.
    pub registry_type: String,
    pub route_prefix: Option<String>,
    pub credentials: Option<Credentials>,
    pub is_default: bool,
}

impl MirrorRecord {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            url: strip_trailing_slash(&url.into()).to_string(),
            enabled: true,
            latency_ms: UNREACHABLE,
            last_check: None,
            registry_type: String::new(),
            route_prefix: None,
            credentials: None,
            is_default: false,
        }
    }

    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = normalize_prefix(&prefix.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// A mirror is selectable iff it is enabled and has finite measured
    /// latency.
    pub fn is_selectable(&self) -> bool {
        self.enabled && self.latency_ms < UNREACHABLE
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// The synthetic hard-fallback mirror used when no selectable mirror
    /// exists. Never persisted.
    pub fn fallback() -> Self {
        Self {
            id: "fallback".to_string(),
            name: "Docker Hub (fallback)".to_string(),
            url: "https://registry-1.docker.io".to_string(),
            enabled: true,
            latency_ms: 0,
            last_check: None,
            registry_type: "dockerhub".to_string(),
            route_prefix: None,
            credentials: None,
            is_default: true,
        }
    }
}

/// Strip a single trailing slash; trailing slashes are insignificant in a
/// mirror URL.
pub fn strip_trailing_slash(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Normalize a route prefix: trim slashes, collapse empty to `None`.
pub fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
