use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::call::CallSession;
use crate::ids::{AgentId, CallId, CampaignId};
use crate::inbound::RoutingPriority;

/// Subscription scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum Topic {
    Agent(AgentId),
    Campaign(CampaignId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Agent(id) => write!(f, "agent:{}", id),
            Topic::Campaign(id) => write!(f, "campaign:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A call is ringing for this agent
    Ringing,
    /// An agent took the call
    Answered,
    Ended,
    /// Retract an earlier ringing notification
    Withdrawn,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Ringing => "ringing",
            NotificationKind::Answered => "answered",
            NotificationKind::Ended => "ended",
            NotificationKind::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message delivered on a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub call_id: CallId,
    /// Agent the message concerns: the one rung, the winner, or the one withdrawn from
    pub agent_id: Option<AgentId>,
    pub campaign_id: Option<CampaignId>,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<RoutingPriority>,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn for_call(kind: NotificationKind, session: &CallSession) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            call_id: session.id.clone(),
            agent_id: session.agent_id.clone(),
            campaign_id: session.campaign_id.clone(),
            phone_number: session.phone_number.clone(),
            priority: None,
            at: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent: AgentId) -> Self {
        self.agent_id = Some(agent);
        self
    }

    pub fn with_priority(mut self, priority: RoutingPriority) -> Self {
        self.priority = Some(priority);
        self
    }
}
