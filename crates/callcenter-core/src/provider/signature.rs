use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{CallCenterError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Webhook signature scheme shared with the provider
///
/// The signature is `base64(HMAC-SHA1(secret, url ++ k1 ++ v1 ++ k2 ++ v2 ...))` where
/// the form parameters are concatenated in key order. The same key signs the routing
/// documents this service returns, so the provider can check they came from us.
///
/// ```
/// use std::collections::BTreeMap;
/// use callcenter_core::provider::WebhookSigner;
///
/// let signer = WebhookSigner::new("s3cret");
/// let mut params = BTreeMap::new();
/// params.insert("CallSid".to_string(), "CA123".to_string());
///
/// let sig = signer.sign_request("https://cc.example.com/webhooks/voice/inbound", &params).unwrap();
/// assert!(signer.verify_request("https://cc.example.com/webhooks/voice/inbound", &params, &sig));
/// assert!(!signer.verify_request("https://cc.example.com/other", &params, &sig));
/// ```
#[derive(Clone)]
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").field("secret", &"<redacted>").finish()
    }
}

impl WebhookSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha1> {
        HmacSha1::new_from_slice(&self.secret)
            .map_err(|e| CallCenterError::internal(format!("Failed to create HMAC: {}", e)))
    }

    fn request_mac(&self, url: &str, params: &BTreeMap<String, String>) -> Result<HmacSha1> {
        let mut mac = self.mac()?;
        mac.update(url.as_bytes());
        for (key, value) in params {
            mac.update(key.as_bytes());
            mac.update(value.as_bytes());
        }
        Ok(mac)
    }

    /// Compute the signature a provider would attach to this request
    pub fn sign_request(&self, url: &str, params: &BTreeMap<String, String>) -> Result<String> {
        let tag = self.request_mac(url, params)?.finalize().into_bytes();
        Ok(STANDARD.encode(tag))
    }

    /// Constant-time check of a provider signature
    pub fn verify_request(&self, url: &str, params: &BTreeMap<String, String>, signature: &str) -> bool {
        let Ok(expected) = STANDARD.decode(signature.trim()) else {
            return false;
        };
        match self.request_mac(url, params) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }

    /// Sign an outgoing document body
    pub fn sign_body(&self, body: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        p.insert("To".to_string(), "+15550001111".to_string());
        p.insert("From".to_string(), "+15552223333".to_string());
        p.insert("CallSid".to_string(), "CA42".to_string());
        p
    }

    #[test]
    fn test_tampered_params_fail() {
        let signer = WebhookSigner::new("secret");
        let url = "https://cc.example.com/webhooks/voice/inbound";
        let sig = signer.sign_request(url, &params()).unwrap();

        let mut tampered = params();
        tampered.insert("From".to_string(), "+15559999999".to_string());
        assert!(!signer.verify_request(url, &tampered, &sig));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let url = "https://cc.example.com/webhooks/voice/status";
        let sig = WebhookSigner::new("a").sign_request(url, &params()).unwrap();
        assert!(!WebhookSigner::new("b").verify_request(url, &params(), &sig));
    }

    #[test]
    fn test_garbage_signature_fails() {
        let signer = WebhookSigner::new("secret");
        assert!(!signer.verify_request("https://x", &params(), "not base64 !!"));
        assert!(!signer.verify_request("https://x", &params(), ""));
    }

    #[test]
    fn test_body_signature_is_stable() {
        let signer = WebhookSigner::new("secret");
        let a = signer.sign_body("<Response/>").unwrap();
        let b = signer.sign_body("<Response/>").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, signer.sign_body("<Response></Response>").unwrap());
    }
}
