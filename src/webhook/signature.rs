//! Carrier webhook signature verification.
//!
//! The carrier signs each callback with HMAC-SHA256 over the full request
//! URL followed by every form parameter's key and value concatenated in
//! key order, base64-encoded into the signature header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

pub const SIGNATURE_HEADER: &str = "x-signalwire-signature";

type HmacSha256 = Hmac<Sha256>;

/// Compute the expected signature for a callback.
pub fn compute(secret: &str, url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verify a presented signature in constant time.
pub fn verify(
    secret: &str,
    url: &str,
    params: &[(String, String)],
    presented: &str,
) -> Result<(), WebhookError> {
    let presented_bytes = BASE64
        .decode(presented.trim())
        .map_err(|_| WebhookError::InvalidSignature)?;

    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    mac.verify_slice(&presented_bytes)
        .map_err(|_| WebhookError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<(String, String)> {
        vec![
            ("To".into(), "+15559990000".into()),
            ("From".into(), "+15550001111".into()),
            ("Body".into(), "hello".into()),
            ("MessageSid".into(), "SM123".into()),
        ]
    }

    #[test]
    fn verify_accepts_own_signature() {
        let url = "https://example.com/webhooks/sms";
        let sig = compute("secret", url, &params());
        assert!(verify("secret", url, &params(), &sig).is_ok());
    }

    #[test]
    fn signature_covers_parameter_values() {
        let url = "https://example.com/webhooks/sms";
        let sig = compute("secret", url, &params());
        let mut tampered = params();
        tampered[2].1 = "send money".into();
        assert!(verify("secret", url, &tampered, &sig).is_err());
    }

    #[test]
    fn parameter_order_does_not_matter() {
        let url = "https://example.com/webhooks/sms";
        let sig = compute("secret", url, &params());
        let mut shuffled = params();
        shuffled.reverse();
        assert!(verify("secret", url, &shuffled, &sig).is_ok());
    }

    #[test]
    fn wrong_secret_rejected() {
        let url = "https://example.com/webhooks/sms";
        let sig = compute("secret", url, &params());
        assert!(verify("other", url, &params(), &sig).is_err());
    }

    #[test]
    fn garbage_signature_rejected() {
        let url = "https://example.com/webhooks/sms";
        assert!(verify("secret", url, &params(), "not base64 !!!").is_err());
    }
}
