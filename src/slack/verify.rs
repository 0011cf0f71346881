//! Slack request signature verification.
//!
//! Slack signs `v0:<timestamp>:<body>` with the app's signing secret and
//! sends `v0=<hex>` in `X-Slack-Signature`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::error::{RelayError, RelayResult};

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

const VERSION: &str = "v0";

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    window: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, window: Duration) -> Self {
        Self {
            secret: secret.into(),
            window,
        }
    }

    /// Check a request against the current clock.
    pub fn verify(&self, timestamp: &str, signature: &str, body: &[u8]) -> RelayResult<()> {
        self.verify_at(chrono::Utc::now().timestamp(), timestamp, signature, body)
    }

    /// Check a request as if the current unix time were `now`.
    pub fn verify_at(
        &self,
        now: i64,
        timestamp: &str,
        signature: &str,
        body: &[u8],
    ) -> RelayResult<()> {
        let sent: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| RelayError::SignatureInvalid)?;
        if now.abs_diff(sent) > self.window.as_secs() {
            return Err(RelayError::ReplayWindowExceeded);
        }

        let expected = signature
            .strip_prefix("v0=")
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(RelayError::SignatureInvalid)?;

        self.mac(timestamp, body)?
            .verify_slice(&expected)
            .map_err(|_| RelayError::SignatureInvalid)
    }

    /// Signature header value for a request body.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> RelayResult<String> {
        let mac = self.mac(timestamp, body)?;
        Ok(format!("{}={}", VERSION, hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> RelayResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| RelayError::SignatureInvalid)?;
        mac.update(VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const NOW: i64 = 1_700_000_000;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new("8f742231b10e8888abcd99yyyzzz85a5", Duration::from_secs(300))
    }

    #[test]
    fn test_accepts_fresh_signed_request() {
        let verifier = verifier();
        let body = b"token=abc&command=%2Fozinger&text=detach";
        let timestamp = NOW.to_string();
        let signature = verifier.sign(&timestamp, body).unwrap();

        assert!(signature.starts_with("v0="));
        assert_ok!(verifier.verify_at(NOW + 30, &timestamp, &signature, body));
        assert_ok!(verifier.verify_at(NOW - 300, &timestamp, &signature, body));
        assert_err!(verifier.verify_at(NOW + 301, &timestamp, &signature, body));
    }

    #[test]
    fn test_rejects_stale_timestamp_with_valid_signature() {
        let verifier = verifier();
        let body = br#"{"type":"event_callback"}"#;
        let timestamp = (NOW - 600).to_string();
        let signature = verifier.sign(&timestamp, body).unwrap();

        let result = verifier.verify_at(NOW, &timestamp, &signature, body);
        assert!(matches!(result, Err(RelayError::ReplayWindowExceeded)));
    }

    #[test]
    fn test_rejects_tampered_body() {
        let verifier = verifier();
        let timestamp = NOW.to_string();
        let signature = verifier.sign(&timestamp, b"text=attach").unwrap();

        let result = verifier.verify_at(NOW, &timestamp, &signature, b"text=detach");
        assert!(matches!(result, Err(RelayError::SignatureInvalid)));
    }

    #[test]
    fn test_rejects_malformed_headers() {
        let verifier = verifier();
        let timestamp = NOW.to_string();

        for signature in ["", "v1=00", "v0=not-hex"] {
            let result = verifier.verify_at(NOW, &timestamp, signature, b"");
            assert!(matches!(result, Err(RelayError::SignatureInvalid)));
        }
        let result = verifier.verify_at(NOW, "yesterday", "v0=00", b"");
        assert!(matches!(result, Err(RelayError::SignatureInvalid)));
    }
}
