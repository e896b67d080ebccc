//! Browser origin check for the control UI.

use axum::http::HeaderMap;

use oc_domain::config::GatewayConfig;

/// Decide whether a browser request may talk to the control UI.
///
/// - No `Origin` header: allowed (non-browser callers), unless the legacy
///   host-header fallback is explicitly enabled, in which case the `Host`
///   must match the gateway.
/// - Loopback origins are always fine for development.
/// - Otherwise the origin must appear in `allowedOrigins`; a `"*"` entry
///   (trim-tolerant) accepts anything.
pub fn check_browser_origin(headers: &HeaderMap, gateway: &GatewayConfig) -> bool {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());

    let Some(origin) = origin else {
        if gateway.control_ui.allow_legacy_host_header {
            let host = headers
                .get("host")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            return host_matches_gateway(host, gateway);
        }
        return true;
    };

    if is_loopback_origin(origin) {
        return true;
    }

    gateway
        .control_ui
        .allowed_origins
        .iter()
        .any(|allowed| {
            let allowed = allowed.trim();
            allowed == "*" || allowed == origin
        })
}

fn is_loopback_origin(origin: &str) -> bool {
    let rest = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .unwrap_or(origin);
    let host = rest.split(':').next().unwrap_or(rest);
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

fn host_matches_gateway(host: &str, gateway: &GatewayConfig) -> bool {
    let expected_port = gateway.port.to_string();
    match host.rsplit_once(':') {
        Some((name, port)) => {
            port == expected_port
                && (name == "localhost"
                    || name == "127.0.0.1"
                    || Some(name) == gateway.host.as_deref())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::config::BindMode;

    fn headers(origin: Option<&str>, host: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(o) = origin {
            h.insert("origin", o.parse().unwrap());
        }
        if let Some(hh) = host {
            h.insert("host", hh.parse().unwrap());
        }
        h
    }

    #[test]
    fn loopback_origins_always_pass() {
        let gw = GatewayConfig::default();
        assert!(check_browser_origin(&headers(Some("http://localhost:18789"), None), &gw));
        assert!(check_browser_origin(&headers(Some("http://127.0.0.1:9999"), None), &gw));
    }

    #[test]
    fn allowlisted_origin_passes() {
        let mut gw = GatewayConfig::default();
        gw.control_ui.allowed_origins = vec!["https://ui.example.test".into()];
        assert!(check_browser_origin(
            &headers(Some("https://ui.example.test"), None),
            &gw
        ));
        assert!(!check_browser_origin(
            &headers(Some("https://evil.example.test"), None),
            &gw
        ));
    }

    #[test]
    fn wildcard_is_trim_tolerant() {
        let mut gw = GatewayConfig::default();
        gw.control_ui.allowed_origins = vec![" * ".into()];
        assert!(check_browser_origin(
            &headers(Some("https://anything.example"), None),
            &gw
        ));
    }

    #[test]
    fn missing_origin_passes_by_default() {
        let gw = GatewayConfig::default();
        assert!(check_browser_origin(&headers(None, None), &gw));
    }

    #[test]
    fn legacy_host_fallback_only_when_enabled() {
        let mut gw = GatewayConfig::default();
        gw.bind = BindMode::Lan;
        gw.control_ui.allow_legacy_host_header = true;
        assert!(check_browser_origin(
            &headers(None, Some("localhost:18789")),
            &gw
        ));
        assert!(!check_browser_origin(
            &headers(None, Some("evil.example:18789")),
            &gw
        ));
    }
}
