//! RequestSigner (spec §4.7): HMAC-SHA256 signing/verification with
//! timestamp TTL. When no secret is configured, signing is a no-op and
//! verification accepts (spec §4.7).

use crate::canonical::canonical_json;
use crate::error::{ChainboxError, ChainboxResult};
use hmac::{Hmac, Mac};
use serde_json::Value as Json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Chainbox-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Chainbox-Timestamp";

pub struct RequestSigner {
    secret: Option<String>,
    ttl_ms: u64,
}

impl RequestSigner {
    pub fn new(secret: Option<String>, ttl_ms: u64) -> Self {
        Self { secret, ttl_ms }
    }

    fn message(timestamp_ms: i64, payload: &Json) -> String {
        format!("{timestamp_ms}:{}", canonical_json(payload))
    }

    /// Returns `(timestamp_ms, hex_signature)`, or `None` when no secret is
    /// configured.
    pub fn sign(&self, payload: &Json, now_ms: i64) -> Option<(i64, String)> {
        let secret = self.secret.as_ref()?;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(Self::message(now_ms, payload).as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Some((now_ms, signature))
    }

    /// Rejects when the timestamp is older than TTL, when clock skew places
    /// it in the future, or when the constant-time comparison fails (spec
    /// §4.7).
    pub fn verify(
        &self,
        payload: &Json,
        timestamp_ms: i64,
        signature: &str,
        now_ms: i64,
    ) -> ChainboxResult<()> {
        let Some(secret) = self.secret.as_ref() else {
            return Ok(());
        };

        if timestamp_ms > now_ms {
            return Err(ChainboxError::InvalidSignature(
                "timestamp is in the future".to_string(),
            ));
        }
        if now_ms - timestamp_ms > self.ttl_ms as i64 {
            return Err(ChainboxError::InvalidSignature(
                "timestamp exceeds signature TTL".to_string(),
            ));
        }

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(Self::message(timestamp_ms, payload).as_bytes());
        let expected = hex::decode(signature)
            .map_err(|_| ChainboxError::InvalidSignature("malformed signature".to_string()))?;

        mac.verify_slice(&expected)
            .map_err(|_| ChainboxError::InvalidSignature("signature mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips() {
        let signer = RequestSigner::new(Some("secret".to_string()), 60_000);
        let payload = json!({"fn": "Math.Add", "input": {"a": 1}});
        let (ts, sig) = signer.sign(&payload, 1_000).unwrap();
        assert!(signer.verify(&payload, ts, &sig, 1_500).is_ok());
    }

    #[test]
    fn rejects_expired_timestamp() {
        let signer = RequestSigner::new(Some("secret".to_string()), 1_000);
        let payload = json!({"a": 1});
        let (ts, sig) = signer.sign(&payload, 0).unwrap();
        assert!(signer.verify(&payload, ts, &sig, 2_000).is_err());
    }

    #[test]
    fn rejects_future_timestamp() {
        let signer = RequestSigner::new(Some("secret".to_string()), 60_000);
        let payload = json!({"a": 1});
        assert!(signer.verify(&payload, 10_000, "00", 0).is_err());
    }

    #[test]
    fn flipping_a_byte_rejects() {
        let signer = RequestSigner::new(Some("secret".to_string()), 60_000);
        let payload = json!({"a": 1});
        let (ts, mut sig) = signer.sign(&payload, 0).unwrap();
        let last = sig.pop().unwrap();
        sig.push(if last == '0' { '1' } else { '0' });
        assert!(signer.verify(&payload, ts, &sig, 0).is_err());
    }

    #[test]
    fn no_secret_is_noop() {
        let signer = RequestSigner::new(None, 60_000);
        assert!(signer.sign(&json!({}), 0).is_none());
        assert!(signer.verify(&json!({}), -9999, "garbage", 0).is_ok());
    }
}
