//! Process-wide network hygiene for providers with flaky dual-stack
//! behavior (Telegram most of all).
//!
//! Applies connection tuning once per process, classifies transient
//! network failures, and falls back to IPv4-only resolution for a single
//! retry when a request dies with a known dual-stack error.

use std::time::Duration;

use parking_lot::Mutex;

use oc_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsResultOrder {
    Ipv4First,
    Verbatim,
}

/// Connection tuning applied to outbound HTTP clients.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkTuning {
    pub auto_select_family: Option<bool>,
    pub dns_result_order: Option<DnsResultOrder>,
    /// Per-address connect attempt budget. The stock client freezes its
    /// connect options at construction, so tuning changes rebuild the
    /// client.
    pub connect_attempt_timeout: Duration,
}

impl Default for NetworkTuning {
    fn default() -> Self {
        Self {
            auto_select_family: None,
            dns_result_order: None,
            connect_attempt_timeout: Duration::from_millis(300),
        }
    }
}

impl NetworkTuning {
    /// The IPv4 fallback profile applied after a transient dual-stack
    /// failure.
    pub fn ipv4_fallback() -> Self {
        Self {
            auto_select_family: Some(false),
            dns_result_order: Some(DnsResultOrder::Ipv4First),
            connect_attempt_timeout: Duration::from_millis(300),
        }
    }

    /// Build an HTTP client carrying this tuning.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_attempt_timeout.max(Duration::from_millis(300)))
            .timeout(Duration::from_secs(60));
        if self.dns_result_order == Some(DnsResultOrder::Ipv4First)
            || self.auto_select_family == Some(false)
        {
            // Pin the local side to IPv4 so resolution cannot wander back
            // to an unreachable IPv6 route.
            builder = builder.local_address(Some(std::net::IpAddr::V4(
                std::net::Ipv4Addr::UNSPECIFIED,
            )));
        }
        builder
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Applied-once hygiene record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide record of applied tuning. Re-applying identical values is a
/// no-op; a configured proxy is never clobbered by implicit tuning.
pub struct NetworkHygiene {
    applied: Mutex<Option<NetworkTuning>>,
}

impl NetworkHygiene {
    pub const fn new() -> Self {
        Self {
            applied: Mutex::new(None),
        }
    }

    /// Apply tuning if it differs from what is already in effect. Returns
    /// the client to use, or `None` when nothing changed.
    pub fn apply(&self, tuning: NetworkTuning) -> Result<Option<reqwest::Client>> {
        if proxy_env_configured() && tuning == NetworkTuning::default() {
            // A proxy-bearing environment keeps its own dispatcher.
            return Ok(None);
        }
        let mut applied = self.applied.lock();
        if applied.as_ref() == Some(&tuning) {
            return Ok(None);
        }
        let client = tuning.build_client()?;
        tracing::info!(?tuning, "network tuning applied");
        *applied = Some(tuning);
        Ok(Some(client))
    }

    pub fn applied(&self) -> Option<NetworkTuning> {
        self.applied.lock().clone()
    }
}

impl Default for NetworkHygiene {
    fn default() -> Self {
        Self::new()
    }
}

fn proxy_env_configured() -> bool {
    ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"]
        .iter()
        .any(|name| {
            std::env::var(name)
                .or_else(|_| std::env::var(name.to_ascii_lowercase()))
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transient error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const TRANSIENT_CODES: &[&str] = &[
    "ETIMEDOUT",
    "ENETUNREACH",
    "EHOSTUNREACH",
    "UND_ERR_CONNECT_TIMEOUT",
    "UND_ERR_SOCKET",
];

/// Whether an outbound fetch failure looks like a transient dual-stack
/// network error worth an IPv4-fallback retry.
pub fn is_transient_network_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    let code_hit = TRANSIENT_CODES
        .iter()
        .any(|code| message.contains(code) || lower.contains(&code.to_ascii_lowercase()));
    code_hit
        || (lower.contains("fetch failed")
            || lower.contains("connect error")
            || lower.contains("connection timed out"))
}

/// Run a request once; on a transient network error, apply the IPv4
/// fallback and retry exactly once with the rebuilt client.
pub async fn with_ipv4_fallback<T, F, Fut>(
    hygiene: &NetworkHygiene,
    client: reqwest::Client,
    mut op: F,
) -> Result<T>
where
    F: FnMut(reqwest::Client) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match op(client).await {
        Ok(v) => Ok(v),
        Err(e) if is_transient_network_error(&e.to_string()) => {
            tracing::warn!(error = %e, "transient network error; retrying with IPv4 fallback");
            let fallback = hygiene
                .apply(NetworkTuning::ipv4_fallback())?
                .unwrap_or(NetworkTuning::ipv4_fallback().build_client()?);
            op(fallback).await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(is_transient_network_error("fetch failed: ETIMEDOUT"));
        assert!(is_transient_network_error("ENETUNREACH while connecting"));
        assert!(is_transient_network_error("UND_ERR_CONNECT_TIMEOUT"));
        assert!(is_transient_network_error("fetch failed"));
        assert!(!is_transient_network_error("401 unauthorized"));
        assert!(!is_transient_network_error("invalid JSON"));
    }

    #[test]
    fn apply_is_idempotent_per_tuning() {
        let hygiene = NetworkHygiene::new();
        let first = hygiene.apply(NetworkTuning::ipv4_fallback()).unwrap();
        assert!(first.is_some());
        let second = hygiene.apply(NetworkTuning::ipv4_fallback()).unwrap();
        assert!(second.is_none());
        assert_eq!(hygiene.applied(), Some(NetworkTuning::ipv4_fallback()));
    }

    #[tokio::test]
    async fn fallback_retries_once_on_transient_error() {
        let hygiene = NetworkHygiene::new();
        let client = NetworkTuning::default().build_client().unwrap();
        let mut calls = 0;
        let result: Result<&str> = with_ipv4_fallback(&hygiene, client, |_c| {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt == 1 {
                    Err(Error::Http("fetch failed: ETIMEDOUT".into()))
                } else {
                    Ok("recovered")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls, 2);
        assert_eq!(hygiene.applied(), Some(NetworkTuning::ipv4_fallback()));
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let hygiene = NetworkHygiene::new();
        let client = NetworkTuning::default().build_client().unwrap();
        let mut calls = 0;
        let result: Result<&str> = with_ipv4_fallback(&hygiene, client, |_c| {
            calls += 1;
            async move { Err(Error::Auth("bad token".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
