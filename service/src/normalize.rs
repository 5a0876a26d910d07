//! Pure URL normalization and preflight validation.
//!
//! `normalize_url` backs the analysis id's UUIDv5 derivation (so equivalent
//! URLs collapse to the same identity); `preflight` is the gate intake and the
//! fetcher both run before ever touching the network.

use url::Url;

const MIN_URL_LEN: usize = 3;
const MAX_URL_LEN: usize = 10_000;

const BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Lowercase scheme/host, strip default ports, drop the fragment, drop a
/// trailing "/" from the path, keep the query string. Two URLs differing only
/// in those respects normalize to the same string.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let mut url = Url::parse(raw).map_err(|e| e.to_string())?;

    url.set_fragment(None);

    let scheme = url.scheme().to_lowercase();
    let is_default_port = matches!(
        (scheme.as_str(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = url.set_port(None);
    }

    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        url.set_host(Some(&lower)).map_err(|e| e.to_string())?;
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

fn host_is_blocked(host: &str) -> bool {
    let lower = host.to_lowercase();
    if BLOCKED_HOSTS.contains(&lower.as_str()) || lower.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = lower.parse::<std::net::IpAddr>() {
        return is_private_ip(&ip);
    }

    false
}

fn is_private_ip(ip: &std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_unspecified()
                || v4.is_link_local()
        }
        std::net::IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Non-empty, length-bounded, http(s)-only, host present and not in the
/// block-list (localhost, loopback/private ranges, `*.localhost`).
pub fn preflight(raw: &str) -> Result<Url, String> {
    if raw.len() < MIN_URL_LEN || raw.len() > MAX_URL_LEN {
        return Err(format!(
            "URL length {} outside allowed range [{}, {}]",
            raw.len(),
            MIN_URL_LEN,
            MAX_URL_LEN
        ));
    }

    let url = Url::parse(raw).map_err(|e| e.to_string())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme: {}", url.scheme()));
    }

    let host = url.host_str().ok_or_else(|| "missing host".to_string())?;
    if host_is_blocked(host) {
        return Err(format!("host is blocked: {}", host));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_host_case_and_default_port() {
        let a = normalize_url("HTTPS://Example.com:443/path/").unwrap();
        let b = normalize_url("https://example.com/path").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn drops_fragment() {
        let a = normalize_url("https://example.com/path#section").unwrap();
        let b = normalize_url("https://example.com/path").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn preserves_query() {
        let normalized = normalize_url("https://example.com/path?a=1").unwrap();
        assert!(normalized.contains("a=1"));
    }

    #[test]
    fn preflight_rejects_short_url() {
        assert!(preflight("ab").is_err());
    }

    #[test]
    fn preflight_accepts_minimum_length() {
        assert!(preflight("abc").is_err(), "not a valid URL, but exercises the length gate first");
    }

    #[test]
    fn preflight_rejects_non_http_scheme() {
        assert!(preflight("ftp://example.com/file").is_err());
    }

    #[test]
    fn preflight_rejects_localhost() {
        assert!(preflight("http://localhost:8080").is_err());
        assert!(preflight("http://127.0.0.1").is_err());
        assert!(preflight("http://sub.localhost").is_err());
    }

    #[test]
    fn preflight_rejects_private_ranges() {
        assert!(preflight("http://10.0.0.1").is_err());
        assert!(preflight("http://172.16.0.1").is_err());
        assert!(preflight("http://192.168.1.1").is_err());
    }

    #[test]
    fn preflight_accepts_public_host() {
        assert!(preflight("https://example.com").is_ok());
    }

    #[test]
    fn preflight_rejects_too_long() {
        let long = format!("https://example.com/{}", "a".repeat(10_000));
        assert!(preflight(&long).is_err());
    }
}
