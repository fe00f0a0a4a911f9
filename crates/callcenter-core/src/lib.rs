//! # Call Center Core
//!
//! Orchestration core for a multi-campaign outbound/inbound call center. The crate sits
//! between a telephony provider (reached through the [`provider::TelephonyProvider`]
//! trait), a contact database, agent presence, and the real-time channel agents'
//! desktops listen on.
//!
//! ## Overview
//!
//! - **Dial-queue admission control**: one control loop per active campaign decides
//!   every tick how many contacts to dial, under Progressive, Predictive or Power pacing
//! - **Call state tracking**: a single registry owns every live call, applies provider
//!   status pushes monotonically, and mirrors sessions durably for crash recovery
//! - **Inbound routing**: a webhook-driven router detects callbacks, ranks agents, and
//!   resolves concurrent answer attempts with an atomic claim
//! - **Notification fan-out**: per-agent and per-campaign topics for ringing, answered,
//!   ended and withdrawn notifications
//!
//! ## Architecture
//!
//! ```text
//!   provider webhooks          agent desktops (SSE)
//!          │                          ▲
//!  ┌───────▼────────┐        ┌────────┴────────┐
//!  │   HTTP surface │        │ NotificationHub │
//!  └───────┬────────┘        └────────▲────────┘
//!          │                          │
//!  ┌───────▼────────┐  events ┌───────┴─────────┐
//!  │ InboundRouter  │────────►│  CallRegistry   │◄──── DialerService
//!  └───────┬────────┘         └───────┬─────────┘      (campaign loops)
//!          │                          │
//!  ┌───────▼──────────────────────────▼─────────┐
//!  │           CallControlAdapter               │
//!  └────────────────────┬───────────────────────┘
//!                       │
//!               TelephonyProvider
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use callcenter_core::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let provider = Arc::new(SimulatedProvider::new());
//! let engine = CallCenterEngine::builder()
//!     .with_config(CallCenterConfig::default())
//!     .with_provider(provider)
//!     .build()
//!     .await?;
//!
//! engine.start().await?;
//! let stats = engine.get_stats().await;
//! println!("live calls: {}", stats.live_calls);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Modules
//!
//! - [`call`]: call sessions, status vocabulary, the live-call registry
//! - [`provider`]: provider abstraction, retrying adapter, webhook signatures, signaling documents
//! - [`contacts`]: contact store, per-contact locking and retry eligibility
//! - [`agent`]: agent directory and availability
//! - [`dialer`]: campaigns, dial queues, pacing and the per-campaign control loop
//! - [`inbound`]: inbound routing decisions and answer claims
//! - [`notify`]: real-time notification hub
//! - [`database`]: SQLite mirror of live calls and completed-call records
//! - [`api`]: webhook, answer and event-stream HTTP routes
//! - [`orchestrator`]: the engine wiring everything together

pub mod error;
pub mod config;
pub mod ids;

pub mod call;
pub mod provider;
pub mod contacts;
pub mod agent;
pub mod dialer;
pub mod inbound;
pub mod notify;

pub mod database;
pub mod api;
pub mod orchestrator;

pub use error::{CallCenterError, Result};
pub use config::CallCenterConfig;
pub use orchestrator::{CallCenterEngine, CallCenterStats};

/// Prelude module for convenient imports
///
/// ```
/// use callcenter_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{CallCenterConfig, CallCenterError, CallCenterStats, Result};
    pub use crate::orchestrator::{CallCenterEngine, CallCenterEngineBuilder};

    pub use crate::config::{
        CallConfig, DatabaseConfig, DialerConfig, GeneralConfig, InboundConfig, NotificationConfig,
        ProviderConfig,
    };

    pub use crate::ids::{AgentId, CallId, CampaignId, ContactId, ProviderCallId, QueueEntryId};

    pub use crate::call::{
        CallAction, CallDirection, CallLifecycleEvent, CallRegistry, CallSession, CallStatus,
        CompletedCallRecord, EndReason, NewCall,
    };
    pub use crate::provider::{
        CallControlAdapter, ProviderInstruction, SimulatedBehavior, SimulatedProvider,
        TelephonyProvider, WebhookRequest, WebhookSigner,
    };
    pub use crate::contacts::{Contact, ContactStore, InMemoryContactStore};
    pub use crate::agent::{Agent, AgentDirectory, AgentStatus, InMemoryAgentDirectory};
    pub use crate::dialer::{
        Campaign, CampaignStatus, DialQueueEntry, DialerService, PacingPolicy, PacingStrategy,
        QueueEntryStatus,
    };
    pub use crate::inbound::{
        InboundRouter, InboundRoutingDecision, RoutingInstruction, RoutingPriority, SuggestedAction,
    };
    pub use crate::notify::{Notification, NotificationHub, NotificationKind, Topic};
    pub use crate::database::DatabaseManager;

    pub use chrono::{DateTime, Utc};
}
