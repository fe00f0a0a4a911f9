//! # Telephony Provider Integration
//!
//! Everything the core knows about the external voice provider goes through
//! [`TelephonyProvider`]. The [`CallControlAdapter`] wraps a provider with per-request
//! deadlines and the single-retry policy, verifies webhook signatures, and renders
//! routing decisions into signed signaling documents.
//!
//! [`SimulatedProvider`] is an in-process implementation with scriptable behaviour, used
//! by the demo binary and by tests.

pub mod adapter;
pub mod signaling;
pub mod signature;
pub mod simulated;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::ProviderCallId;

pub use adapter::CallControlAdapter;
pub use signaling::SignedDocument;
pub use signature::WebhookSigner;
pub use simulated::{SimulatedBehavior, SimulatedProvider};

/// Live-call instruction sent to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "instruction")]
pub enum ProviderInstruction {
    Hold,
    Unhold,
    Mute,
    Unmute,
    StartRecording,
    StopRecording,
    Transfer { target: String },
    /// Bridge the call to an agent's client endpoint
    ConnectAgent { endpoint: String },
    /// Move the caller into a provider-side waiting queue
    Park { queue: String, hold_music_url: String },
}

/// Incoming webhook as seen by signature verification
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Absolute URL the provider posted to
    pub url: String,
    /// Form parameters
    pub params: BTreeMap<String, String>,
    /// Signature header value, if present
    pub signature: Option<String>,
}

impl WebhookRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Voice provider operations
///
/// Implementations report failures with [`CallCenterError::AdapterUnavailable`] for
/// transport problems (retried once by the adapter) and
/// [`CallCenterError::ProviderRejected`] for refusals (never retried).
///
/// [`CallCenterError::AdapterUnavailable`]: crate::CallCenterError::AdapterUnavailable
/// [`CallCenterError::ProviderRejected`]: crate::CallCenterError::ProviderRejected
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Start an outbound call; status updates will be posted to `status_callback_url`
    async fn place_call(&self, to: &str, from: &str, status_callback_url: &str) -> Result<ProviderCallId>;

    async fn update_call(&self, call: &ProviderCallId, instruction: &ProviderInstruction) -> Result<()>;

    async fn end_call(&self, call: &ProviderCallId) -> Result<()>;

    /// Check the signature on an incoming webhook
    fn verify_webhook_signature(&self, request: &WebhookRequest) -> bool;
}
