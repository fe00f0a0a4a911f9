//! # Outbound Dialer
//!
//! Campaigns, their dial queues, pacing strategies and the per-campaign admission
//! control loops.
//!
//! ```text
//!  DialerService ──┬── CampaignController (campaign A) ── DialQueue
//!                  ├── CampaignController (campaign B) ── DialQueue
//!                  └── event pump ◄── CallRegistry lifecycle events
//! ```

pub mod campaign;
pub mod controller;
pub mod pacing;
pub mod queue;
pub mod service;

pub use campaign::{Campaign, CampaignStatus, PacingStrategy};
pub use controller::{CampaignController, CampaignStats, TickDecision, TickReport};
pub use pacing::{PacingInput, PacingPolicy};
pub use queue::{DialQueue, DialQueueEntry, QueueEntryStatus, QueueStats};
pub use service::DialerService;
