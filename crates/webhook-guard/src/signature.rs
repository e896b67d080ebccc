//! Shared webhook signature verification.
//!
//! Providers differ in header names (`X-Hub-Signature-256`,
//! `x-bot-api-secret-token`, Slack's `v0=` scheme) but the mechanics are
//! either a shared-secret compare or an HMAC-SHA256 of the raw body; both
//! must be constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time compare for shared-secret header tokens.
pub fn verify_shared_secret(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Verify a GitHub-style `sha256=<hex>` HMAC signature over the raw body.
/// A bare hex digest (no prefix) is accepted too.
pub fn verify_hmac_sha256(secret: &str, body: &[u8], signature: &str) -> bool {
    let sig_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    computed.as_bytes().ct_eq(sig_hex.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_compare() {
        assert!(verify_shared_secret("s3cret", "s3cret"));
        assert!(!verify_shared_secret("s3cret", "guess"));
        assert!(!verify_shared_secret("s3cret", "s3cret2"));
    }

    #[test]
    fn hmac_round_trip() {
        let body = br#"{"event": "push"}"#;
        let mut mac = HmacSha256::new_from_slice(b"hook-secret").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_hmac_sha256("hook-secret", body, &sig));
        assert!(verify_hmac_sha256(
            "hook-secret",
            body,
            &format!("sha256={sig}")
        ));
        assert!(!verify_hmac_sha256("hook-secret", body, "sha256=deadbeef"));
        assert!(!verify_hmac_sha256("wrong-secret", body, &sig));
    }
}
