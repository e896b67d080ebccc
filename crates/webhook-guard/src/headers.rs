//! Response hardening headers and client addressing helpers.

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::HeaderMap;

/// CSP for HTML viewer responses (diff viewer and friends). Everything is
/// denied except same-origin scripts/images/fonts and inline styles.
pub const HTML_VIEWER_CSP: &str = "default-src 'none'; script-src 'self'; \
style-src 'unsafe-inline'; img-src 'self' data:; font-src 'self' data:; \
connect-src 'none'; base-uri 'none'; frame-ancestors 'self'; object-src 'none'";

/// The header set every guarded response carries.
pub fn security_headers(content_type: &'static str) -> [(HeaderName, HeaderValue); 4] {
    [
        (
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ),
        (
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static(content_type),
        ),
        (
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ),
        (
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ),
    ]
}

/// Insert the guard header set into an existing response header map.
pub fn apply_security_headers(headers: &mut HeaderMap, content_type: &'static str) {
    for (name, value) in security_headers(content_type) {
        headers.insert(name, value);
    }
}

/// Normalize a remote address for rate-limit keying: strip the IPv4-mapped
/// `::ffff:` prefix and drop the port.
pub fn client_key(remote: &str) -> String {
    let r = remote.trim();
    let host = if let Some(rest) = r.strip_prefix('[') {
        // Bracketed IPv6 with optional port.
        rest.split_once(']').map(|(h, _)| h).unwrap_or(rest)
    } else if let Some((h, p)) = r.rsplit_once(':') {
        // Host:port only when the host holds no further colons; a bare IPv6
        // address must not lose its last group.
        if !h.contains(':') && !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            r
        }
    } else {
        r
    };
    host.strip_prefix("::ffff:").unwrap_or(host).to_string()
}

/// Whether a normalized client key is the local host.
pub fn is_loopback(client: &str) -> bool {
    client == "127.0.0.1" || client == "::1" || client == "localhost"
}
