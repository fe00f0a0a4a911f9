//! Inbound call routing: caller lookup, callback detection, direct ring or park, and
//! first-answer-wins claims

pub mod router;
pub mod types;

pub use router::{InboundRouter, RouterStats};
pub use types::{
    CallerIdentity, InboundOutcome, InboundRoutingDecision, InboundWebhook, RoutingInstruction,
    RoutingPriority, SuggestedAction,
};
