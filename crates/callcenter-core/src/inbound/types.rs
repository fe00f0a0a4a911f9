use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, ContactId, ProviderCallId};

/// Routing priority of an inbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPriority {
    Normal,
    /// Caller was dialed outbound within the callback window
    High,
    /// Callback from a contact already attempted many times
    Urgent,
}

impl fmt::Display for RoutingPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingPriority::Normal => write!(f, "normal"),
            RoutingPriority::High => write!(f, "high"),
            RoutingPriority::Urgent => write!(f, "urgent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Ring the candidate agents directly
    AnswerDirectly,
    /// Park the caller with hold treatment
    Queue,
}

/// Who is calling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CallerIdentity {
    Contact {
        contact_id: ContactId,
        display_name: Option<String>,
    },
    Anonymous,
}

impl CallerIdentity {
    pub fn contact_id(&self) -> Option<&ContactId> {
        match self {
            CallerIdentity::Contact { contact_id, .. } => Some(contact_id),
            CallerIdentity::Anonymous => None,
        }
    }
}

/// Per-webhook routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRoutingDecision {
    pub action: SuggestedAction,
    /// Agents to ring, best first
    pub candidates: Vec<AgentId>,
    pub priority: RoutingPriority,
    pub caller: CallerIdentity,
}

/// Provider-neutral signaling instruction for an inbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "instruction")]
pub enum RoutingInstruction {
    /// Ring agent endpoints; fall through to the overflow queue if nobody picks up
    Ring {
        endpoints: Vec<String>,
        timeout_secs: u64,
        caller_id: String,
        overflow_queue: String,
        hold_music_url: String,
    },
    Park {
        queue: String,
        hold_music_url: String,
    },
    Reject {
        reason: String,
    },
}

/// Fields of an inbound-call webhook the router needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundWebhook {
    pub provider_call_id: ProviderCallId,
    pub from: String,
    pub to: String,
}

/// Router answer for one webhook
#[derive(Debug, Clone)]
pub struct InboundOutcome {
    pub call_id: crate::ids::CallId,
    pub decision: InboundRoutingDecision,
    pub instruction: RoutingInstruction,
    /// `false` when the webhook was a redelivery of one already handled
    pub created: bool,
}
