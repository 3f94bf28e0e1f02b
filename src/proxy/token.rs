//! Outgoing `Www-Authenticate` rewrite and incoming `/token` relay.

use base64::engine::general_purpose::URL_SAFE as BASE64_URL_SAFE;
use base64::Engine;
use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;

/// Default realm used by the `/token` endpoint when `_upstream_realm` is
/// absent or fails to decode.
pub const DEFAULT_REALM: &str = "https://auth.docker.io/token";

static REALM: Lazy<Regex> = Lazy::new(|| Regex::new(r#"realm="([^"]+)""#).expect("valid regex"));

/// Characters besides the URL-safe base64 alphabet that need percent-
/// encoding when embedded in a query string — in practice only `=` padding.
const QUERY_UNSAFE: &AsciiSet = &CONTROLS.add(b'=').add(b'&').add(b'?').add(b'#').add(b'+');

/// Rewrite an upstream `Www-Authenticate` header so its `realm` points back
/// at this proxy's `/token` endpoint, leaving every other challenge
/// parameter byte-for-byte untouched.
///
/// Returns the header unchanged if no `realm="..."` is present.
pub fn rewrite_www_authenticate(header: &str, proxy_scheme: &str, proxy_host: &str) -> String {
    let Some(caps) = REALM.captures(header) else {
        return header.to_string();
    };
    let upstream_realm = &caps[1];

    let b64_realm = BASE64_URL_SAFE.encode(upstream_realm.as_bytes());
    let encoded = utf8_percent_encode(&b64_realm, QUERY_UNSAFE).to_string();
    let new_realm = format!("{proxy_scheme}://{proxy_host}/token?_upstream_realm={encoded}");

    header.replace(upstream_realm, &new_realm)
}

/// Decode an `_upstream_realm` query value back into the upstream realm URL.
///
/// Tolerates both percent-encoded and raw input, and both padded and
/// unpadded base64. Falls back to [`DEFAULT_REALM`] on any decode failure.
pub fn resolve_upstream_realm(upstream_realm_param: Option<&str>) -> String {
    let Some(raw) = upstream_realm_param else {
        return DEFAULT_REALM.to_string();
    };

    let unquoted = percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());

    let mut padded = unquoted;
    let missing = padded.len() % 4;
    if missing != 0 {
        padded.push_str(&"=".repeat(4 - missing));
    }

    match BASE64_URL_SAFE.decode(padded.as_bytes()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| DEFAULT_REALM.to_string()),
        Err(_) => DEFAULT_REALM.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_replaces_only_realm_value() {
        let header = r#"Bearer realm="https://auth.example/t",service="reg",scope="repository:x:pull""#;
        let rewritten = rewrite_www_authenticate(header, "https", "proxy.local");
        assert!(rewritten.contains(r#"service="reg""#));
        assert!(rewritten.contains(r#"scope="repository:x:pull""#));
        assert!(rewritten.contains("https://proxy.local/token?_upstream_realm="));
        assert!(!rewritten.contains("https://auth.example/t\","));
    }

    #[test]
    fn rewrite_leaves_header_without_realm_unchanged() {
        let header = r#"Basic realm-missing"#;
        assert_eq!(rewrite_www_authenticate(header, "https", "proxy.local"), header);
    }

    #[test]
    fn round_trip_through_rewrite_and_resolve() {
        let original_realm = "https://auth.example/t";
        let header = format!(r#"Bearer realm="{original_realm}",service="reg""#);
        let rewritten = rewrite_www_authenticate(&header, "https", "proxy.local");

        let query_start = rewritten.find("_upstream_realm=").unwrap() + "_upstream_realm=".len();
        let rest = &rewritten[query_start..];
        let encoded = &rest[..rest.find('"').unwrap_or(rest.len())];

        let resolved = resolve_upstream_realm(Some(encoded));
        assert_eq!(resolved, original_realm);
    }

    #[test]
    fn resolve_tolerates_missing_padding() {
        let realm = "https://auth.example/t";
        let padded = BASE64_URL_SAFE.encode(realm.as_bytes());
        let unpadded = padded.trim_end_matches('=').to_string();

        assert_eq!(resolve_upstream_realm(Some(&padded)), realm);
        assert_eq!(resolve_upstream_realm(Some(&unpadded)), realm);
    }

    #[test]
    fn resolve_falls_back_to_default_on_malformed_input() {
        assert_eq!(resolve_upstream_realm(Some("not valid base64!!!")), DEFAULT_REALM);
        assert_eq!(resolve_upstream_realm(None), DEFAULT_REALM);
    }
}
