use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{CallCenterError, Result};
use crate::ids::ProviderCallId;
use crate::inbound::RoutingInstruction;

use super::signaling::{self, SignedDocument};
use super::signature::WebhookSigner;
use super::{ProviderInstruction, TelephonyProvider, WebhookRequest};

/// Attempts per provider request: the original plus one retry
const MAX_ATTEMPTS: u32 = 2;

/// Call Control Adapter
///
/// Isolates the rest of the core from the provider. Every request gets a deadline; a
/// transient failure (timeout or [`CallCenterError::AdapterUnavailable`]) is retried once
/// after a fixed backoff, and a second transient failure surfaces as
/// `AdapterUnavailable`. Provider rejections are returned as-is on the first attempt.
pub struct CallControlAdapter {
    provider: Arc<dyn TelephonyProvider>,
    request_timeout: Duration,
    retry_backoff: Duration,
    status_callback_url: String,
    default_caller_id: String,
    validate_signatures: bool,
    signer: Option<WebhookSigner>,
    stats: AdapterCounters,
}

#[derive(Default)]
struct AdapterCounters {
    requests: AtomicU64,
    retries: AtomicU64,
    unavailable: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of adapter counters
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AdapterStats {
    pub requests: u64,
    pub retries: u64,
    pub unavailable: u64,
    pub rejected: u64,
}

impl CallControlAdapter {
    pub fn new(provider: Arc<dyn TelephonyProvider>, config: &ProviderConfig) -> Self {
        let signer = if config.webhook_secret.is_empty() {
            None
        } else {
            Some(WebhookSigner::new(&config.webhook_secret))
        };

        Self {
            provider,
            request_timeout: config.request_timeout(),
            retry_backoff: config.retry_backoff(),
            status_callback_url: config.status_callback_url(),
            default_caller_id: config.caller_id.clone(),
            validate_signatures: config.validate_signatures,
            signer,
            stats: AdapterCounters::default(),
        }
    }

    pub fn default_caller_id(&self) -> &str {
        &self.default_caller_id
    }

    /// Place an outbound call, presenting `from` (or the default caller id)
    pub async fn place_call(&self, to: &str, from: Option<&str>) -> Result<ProviderCallId> {
        let from = from.unwrap_or(&self.default_caller_id);
        let callback = self.status_callback_url.as_str();
        self.call_with_retry("place_call", || self.provider.place_call(to, from, callback))
            .await
    }

    pub async fn update_call(&self, call: &ProviderCallId, instruction: &ProviderInstruction) -> Result<()> {
        self.call_with_retry("update_call", || self.provider.update_call(call, instruction))
            .await
    }

    pub async fn end_call(&self, call: &ProviderCallId) -> Result<()> {
        self.call_with_retry("end_call", || self.provider.end_call(call)).await
    }

    /// Verify an incoming webhook
    ///
    /// Passes unconditionally when signature validation is disabled. Otherwise a missing
    /// or non-matching signature is [`CallCenterError::WebhookSignatureInvalid`].
    pub fn verify_webhook(&self, request: &WebhookRequest) -> Result<()> {
        if !self.validate_signatures {
            return Ok(());
        }
        if request.signature.is_none() || !self.provider.verify_webhook_signature(request) {
            warn!("🔒 Rejecting webhook to {} with invalid signature", request.url);
            return Err(CallCenterError::WebhookSignatureInvalid);
        }
        Ok(())
    }

    /// Render a routing instruction into the provider's signaling document, signed
    /// when a webhook secret is configured
    pub fn render(&self, instruction: &RoutingInstruction) -> Result<SignedDocument> {
        let body = signaling::render(instruction);
        let signature = match &self.signer {
            Some(signer) => Some(signer.sign_body(&body)?),
            None => None,
        };
        Ok(SignedDocument {
            content_type: signaling::CONTENT_TYPE,
            body,
            signature,
        })
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            requests: self.stats.requests.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            unavailable: self.stats.unavailable.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }

    async fn call_with_retry<T, F, Fut>(&self, operation: &str, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            self.stats.requests.fetch_add(1, Ordering::Relaxed);

            let outcome = match tokio::time::timeout(self.request_timeout, request()).await {
                Ok(result) => result,
                Err(_) => Err(CallCenterError::timeout(format!(
                    "{} exceeded {}ms",
                    operation,
                    self.request_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("✅ {} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!("⚠️ {} failed ({}), retrying in {:?}", operation, e, self.retry_backoff);
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(self.retry_backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    self.stats.unavailable.fetch_add(1, Ordering::Relaxed);
                    return Err(CallCenterError::adapter_unavailable(format!(
                        "{} failed after {} attempts: {}",
                        operation, attempt, e
                    )));
                }
                Err(e) => {
                    if matches!(e, CallCenterError::ProviderRejected(_)) {
                        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{SimulatedBehavior, SimulatedProvider};

    fn config() -> ProviderConfig {
        ProviderConfig {
            request_timeout_ms: 100,
            retry_backoff_ms: 10,
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_single_transient_failure_is_retried() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.fail_next_transient(1);
        let adapter = CallControlAdapter::new(provider.clone(), &config());

        let id = adapter.place_call("+15551230000", None).await.unwrap();
        assert!(id.as_str().starts_with("SIM-"));
        assert_eq!(provider.placed_calls().len(), 1);
        assert_eq!(adapter.stats().retries, 1);
    }

    #[tokio::test]
    async fn test_two_transient_failures_surface_unavailable() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.fail_next_transient(2);
        let adapter = CallControlAdapter::new(provider.clone(), &config());

        let err = adapter.place_call("+15551230000", None).await.unwrap_err();
        assert!(matches!(err, CallCenterError::AdapterUnavailable(_)));
        assert!(provider.placed_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_times_out_twice() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.set_default_behavior(SimulatedBehavior::Hang);
        let adapter = CallControlAdapter::new(provider, &config());

        let err = adapter.place_call("+15551230000", None).await.unwrap_err();
        assert!(matches!(err, CallCenterError::AdapterUnavailable(_)));
        assert_eq!(adapter.stats().requests, 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let provider = Arc::new(SimulatedProvider::new());
        provider.set_behavior_for("+15550000000", SimulatedBehavior::Reject("invalid number".into()));
        let adapter = CallControlAdapter::new(provider, &config());

        let err = adapter.place_call("+15550000000", None).await.unwrap_err();
        assert!(matches!(err, CallCenterError::ProviderRejected(_)));
        let stats = adapter.stats();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn test_verify_webhook_honours_toggle() {
        let provider = Arc::new(SimulatedProvider::with_secret("s3cret"));
        let mut cfg = config();
        cfg.webhook_secret = "s3cret".into();

        let request = WebhookRequest {
            url: "http://127.0.0.1:8080/webhooks/voice/inbound".into(),
            params: Default::default(),
            signature: Some("bogus".into()),
        };

        let lenient = CallControlAdapter::new(provider.clone(), &cfg);
        assert!(lenient.verify_webhook(&request).is_ok());

        cfg.validate_signatures = true;
        let strict = CallControlAdapter::new(provider, &cfg);
        assert!(matches!(
            strict.verify_webhook(&request),
            Err(CallCenterError::WebhookSignatureInvalid)
        ));

        let signed = WebhookRequest {
            signature: Some(
                WebhookSigner::new("s3cret")
                    .sign_request(&request.url, &request.params)
                    .unwrap(),
            ),
            ..request
        };
        assert!(strict.verify_webhook(&signed).is_ok());
    }
}
