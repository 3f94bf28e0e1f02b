use std::fmt;

/// Typed failure categories surfaced at the proxy's exit points. Transport
/// failures carry the upstream error text; `Config` covers malformed
/// startup configuration.
#[derive(Debug)]
pub enum ProxyError {
    UpstreamConnect(String),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::UpstreamConnect(msg) => write!(f, "upstream connect error: {}", msg),
            ProxyError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::UpstreamConnect(e.to_string())
    }
}
