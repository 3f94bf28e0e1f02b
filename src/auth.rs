//! Bearer/basic auth negotiation with upstream registries.

use crate::mirror::Credentials;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

/// Parsed `Www-Authenticate: Bearer ...` challenge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: Option<String>,
    pub service: Option<String>,
    pub scope: Option<String>,
}

static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(realm|service|scope)="([^"]*)""#).expect("valid regex"));

/// Extract `realm`/`service`/`scope` from a `Www-Authenticate` header value.
/// Tolerates arbitrary key ordering and unknown extra keys.
pub fn parse_challenge(header: &str) -> Challenge {
    let mut challenge = Challenge::default();
    for caps in KEY_VALUE.captures_iter(header) {
        let value = caps[2].to_string();
        match &caps[1] {
            "realm" => challenge.realm = Some(value),
            "service" => challenge.service = Some(value),
            "scope" => challenge.scope = Some(value),
            _ => {}
        }
    }
    challenge
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Fetch a bearer token from `realm`, attaching `service`/`scope` as query
/// parameters when present and HTTP Basic auth when `creds` is given.
/// Returns `None` on any non-200 outcome, transport failure, or a JSON body
/// missing both `token` and `access_token`.
pub async fn fetch_bearer(
    client: &reqwest::Client,
    realm: &str,
    service: Option<&str>,
    scope: Option<&str>,
    creds: Option<&Credentials>,
) -> Option<String> {
    let mut query: Vec<(&str, &str)> = Vec::new();
    if let Some(s) = service {
        query.push(("service", s));
    }
    if let Some(s) = scope {
        query.push(("scope", s));
    }

    let mut req = client
        .get(realm)
        .query(&query)
        .timeout(Duration::from_secs(10));

    if let Some(c) = creds {
        req = req.basic_auth(&c.username, Some(c.expose_password()));
    }

    let resp = req.send().await.ok()?;
    if resp.status() != reqwest::StatusCode::OK {
        return None;
    }

    let body: TokenResponse = resp.json().await.ok()?;
    body.token
        .filter(|t| !t.is_empty())
        .or_else(|| body.access_token.filter(|t| !t.is_empty()))
}

/// Build the literal `Basic <base64>` header value for stored credentials.
pub fn build_basic(creds: &Credentials) -> String {
    let raw = format!("{}:{}", creds.username, creds.expose_password());
    format!("Basic {}", BASE64_STANDARD.encode(raw))
}
