//! Shared hardening primitives for webhook-style HTTP endpoints.
//!
//! Every channel plugin that opens an HTTP surface applies the same guards:
//! method/content-type filters, a fixed-window rate limiter, a bounded
//! anomaly counter, a replay dedup cache, and a JSON body reader with byte
//! and wall-clock caps. Guard violations terminate the request with the
//! matching status code; anomaly counters only ever log.

mod anomaly;
mod body;
mod headers;
mod limiter;
mod replay;
mod signature;

pub use anomaly::{AnomalyTracker, BoundedCounter};
pub use body::{read_json_body, BodyError, BodyLimits};
pub use headers::{
    apply_security_headers, client_key, is_loopback, security_headers, HTML_VIEWER_CSP,
};
pub use limiter::{FixedWindowRateLimiter, RateLimiterConfig};
pub use replay::ReplayCache;
pub use signature::{verify_hmac_sha256, verify_shared_secret};

use axum::http::{HeaderMap, Method, StatusCode};

/// Outcome of [`apply_basic_guards`]: `None` means the request may proceed,
/// `Some(status)` is the rejection the caller must return.
pub fn apply_basic_guards(
    method: &Method,
    headers: &HeaderMap,
    allow_methods: &[Method],
    rate: Option<(&FixedWindowRateLimiter, &str)>,
    require_json_content_type: bool,
) -> Option<StatusCode> {
    if !allow_methods.contains(method) {
        return Some(StatusCode::METHOD_NOT_ALLOWED);
    }
    if require_json_content_type && !has_json_content_type(headers) {
        return Some(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
    if let Some((limiter, key)) = rate {
        if limiter.is_limited(key, now_ms()) {
            return Some(StatusCode::TOO_MANY_REQUESTS);
        }
    }
    None
}

pub(crate) fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let mime = v.split(';').next().unwrap_or("").trim();
            mime.eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false)
}

/// Wall-clock milliseconds. Guards take `now_ms` explicitly so tests can
/// drive the clock; this is the production source.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;

    #[test]
    fn rejects_disallowed_method() {
        let headers = HeaderMap::new();
        let got = apply_basic_guards(&Method::GET, &headers, &[Method::POST], None, false);
        assert_eq!(got, Some(StatusCode::METHOD_NOT_ALLOWED));
    }

    #[test]
    fn rejects_missing_json_content_type() {
        let headers = HeaderMap::new();
        let got = apply_basic_guards(&Method::POST, &headers, &[Method::POST], None, true);
        assert_eq!(got, Some(StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }

    #[test]
    fn accepts_json_with_charset() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        let got = apply_basic_guards(&Method::POST, &headers, &[Method::POST], None, true);
        assert_eq!(got, None);
    }

    #[test]
    fn rate_limited_request_gets_429() {
        let limiter = FixedWindowRateLimiter::new(RateLimiterConfig {
            window_ms: 60_000,
            max_requests: 1,
            max_tracked_keys: 16,
        });
        let headers = HeaderMap::new();
        assert_eq!(
            apply_basic_guards(
                &Method::POST,
                &headers,
                &[Method::POST],
                Some((&limiter, "k")),
                false
            ),
            None
        );
        assert_eq!(
            apply_basic_guards(
                &Method::POST,
                &headers,
                &[Method::POST],
                Some((&limiter, "k")),
                false
            ),
            Some(StatusCode::TOO_MANY_REQUESTS)
        );
    }
}
