use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{CallCenterError, Result};
use crate::ids::ProviderCallId;

use super::signature::WebhookSigner;
use super::{ProviderInstruction, TelephonyProvider, WebhookRequest};

/// How the simulated provider answers a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedBehavior {
    Accept,
    Reject(String),
    /// Never respond; the adapter deadline fires
    Hang,
    /// Fail with a transport error
    Unavailable,
}

/// A call the simulated provider accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    pub provider_call_id: ProviderCallId,
    pub to: String,
    pub from: String,
    pub status_callback_url: String,
}

/// Status the simulated provider pushes on its own when auto-progress is enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedStatus {
    pub provider_call_id: ProviderCallId,
    pub status: &'static str,
}

/// In-process [`TelephonyProvider`] with scriptable behaviour
///
/// ```
/// use callcenter_core::provider::{SimulatedBehavior, SimulatedProvider, TelephonyProvider};
///
/// # async fn example() {
/// let provider = SimulatedProvider::new();
/// provider.set_behavior_for("+15550000000", SimulatedBehavior::Reject("blocked".into()));
///
/// assert!(provider.place_call("+15550000000", "+15551111111", "http://cb").await.is_err());
/// assert!(provider.place_call("+15552222222", "+15551111111", "http://cb").await.is_ok());
/// # }
/// ```
pub struct SimulatedProvider {
    default_behavior: Mutex<SimulatedBehavior>,
    per_destination: Mutex<HashMap<String, SimulatedBehavior>>,
    transient_failures: AtomicU32,
    placed: Mutex<Vec<PlacedCall>>,
    updates: Mutex<Vec<(ProviderCallId, ProviderInstruction)>>,
    ended: Mutex<Vec<ProviderCallId>>,
    signer: Option<WebhookSigner>,
    auto_progress: Mutex<Option<Duration>>,
    status_feed: broadcast::Sender<SimulatedStatus>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    pub fn new() -> Self {
        let (status_feed, _) = broadcast::channel(256);
        Self {
            default_behavior: Mutex::new(SimulatedBehavior::Accept),
            per_destination: Mutex::new(HashMap::new()),
            transient_failures: AtomicU32::new(0),
            placed: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            ended: Mutex::new(Vec::new()),
            signer: None,
            auto_progress: Mutex::new(None),
            status_feed,
        }
    }

    /// Provider that checks webhook signatures against `secret`
    pub fn with_secret(secret: &str) -> Self {
        Self {
            signer: Some(WebhookSigner::new(secret)),
            ..Self::new()
        }
    }

    pub fn set_default_behavior(&self, behavior: SimulatedBehavior) {
        *guard(&self.default_behavior) = behavior;
    }

    pub fn set_behavior_for(&self, destination: &str, behavior: SimulatedBehavior) {
        guard(&self.per_destination).insert(destination.to_string(), behavior);
    }

    /// Fail the next `count` requests of any kind with a transport error
    pub fn fail_next_transient(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Push `ringing` then `in-progress` for every accepted call, `delay` apart
    pub fn enable_auto_progress(&self, delay: Duration) {
        *guard(&self.auto_progress) = Some(delay);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SimulatedStatus> {
        self.status_feed.subscribe()
    }

    pub fn placed_calls(&self) -> Vec<PlacedCall> {
        guard(&self.placed).clone()
    }

    pub fn updates(&self) -> Vec<(ProviderCallId, ProviderInstruction)> {
        guard(&self.updates).clone()
    }

    pub fn ended_calls(&self) -> Vec<ProviderCallId> {
        guard(&self.ended).clone()
    }

    fn behavior_for(&self, destination: Option<&str>) -> SimulatedBehavior {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return SimulatedBehavior::Unavailable;
        }
        if let Some(behavior) = destination.and_then(|d| guard(&self.per_destination).get(d).cloned()) {
            return behavior;
        }
        guard(&self.default_behavior).clone()
    }

    async fn apply(&self, behavior: SimulatedBehavior) -> Result<()> {
        match behavior {
            SimulatedBehavior::Accept => Ok(()),
            SimulatedBehavior::Reject(reason) => Err(CallCenterError::provider_rejected(reason)),
            SimulatedBehavior::Unavailable => {
                Err(CallCenterError::adapter_unavailable("simulated transport failure"))
            }
            SimulatedBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CallCenterError::timeout("simulated hang"))
            }
        }
    }
}

#[async_trait]
impl TelephonyProvider for SimulatedProvider {
    async fn place_call(&self, to: &str, from: &str, status_callback_url: &str) -> Result<ProviderCallId> {
        self.apply(self.behavior_for(Some(to))).await?;

        let provider_call_id = ProviderCallId(format!("SIM-{}", uuid::Uuid::new_v4().simple()));
        debug!("📞 Simulated provider placed {} -> {} as {}", from, to, provider_call_id);
        guard(&self.placed).push(PlacedCall {
            provider_call_id: provider_call_id.clone(),
            to: to.to_string(),
            from: from.to_string(),
            status_callback_url: status_callback_url.to_string(),
        });

        let auto_progress = *guard(&self.auto_progress);
        if let Some(delay) = auto_progress {
            let feed = self.status_feed.clone();
            let id = provider_call_id.clone();
            tokio::spawn(async move {
                for status in ["ringing", "in-progress"] {
                    tokio::time::sleep(delay).await;
                    let _ = feed.send(SimulatedStatus {
                        provider_call_id: id.clone(),
                        status,
                    });
                }
            });
        }

        Ok(provider_call_id)
    }

    async fn update_call(&self, call: &ProviderCallId, instruction: &ProviderInstruction) -> Result<()> {
        self.apply(self.behavior_for(None)).await?;
        guard(&self.updates).push((call.clone(), instruction.clone()));
        Ok(())
    }

    async fn end_call(&self, call: &ProviderCallId) -> Result<()> {
        self.apply(self.behavior_for(None)).await?;
        guard(&self.ended).push(call.clone());
        Ok(())
    }

    fn verify_webhook_signature(&self, request: &WebhookRequest) -> bool {
        match (&self.signer, &request.signature) {
            (Some(signer), Some(signature)) => signer.verify_request(&request.url, &request.params, signature),
            (None, _) => true,
            (Some(_), None) => false,
        }
    }
}
