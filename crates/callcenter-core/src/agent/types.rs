//! Core types for agent presence

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, CampaignId};

/// Agent status
///
/// Only `Available` agents count toward pacing and inbound candidate lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Idle and ready for a call
    Available,

    /// On a call
    Busy,

    /// Post-call wrap-up
    PostCallWrapUp,

    /// On a break
    Break,

    Offline,
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(AgentStatus::Available),
            "busy" => Ok(AgentStatus::Busy),
            "postcallwrapup" | "post_call_wrap_up" | "wrap_up" => Ok(AgentStatus::PostCallWrapUp),
            "break" => Ok(AgentStatus::Break),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("Unknown agent status: {}", s)),
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Available => write!(f, "available"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::PostCallWrapUp => write!(f, "post_call_wrap_up"),
            AgentStatus::Break => write!(f, "break"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Agent profile and presence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,

    pub display_name: String,

    /// Provider client identity rung for inbound calls and bridged on outbound connects
    pub endpoint: String,

    pub status: AgentStatus,

    pub logged_in: bool,

    /// Campaigns this agent works
    #[serde(default)]
    pub campaigns: HashSet<CampaignId>,

    /// When the agent last became available; longest-idle agents are offered inbound
    /// calls first
    pub available_since: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, display_name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            endpoint: id.to_string(),
            id,
            display_name: display_name.into(),
            status: AgentStatus::Offline,
            logged_in: false,
            campaigns: HashSet::new(),
            available_since: None,
        }
    }

    pub fn with_campaign(mut self, campaign: impl Into<CampaignId>) -> Self {
        self.campaigns.insert(campaign.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Logged in and idle
    pub fn is_available(&self) -> bool {
        self.logged_in && self.status == AgentStatus::Available
    }

    pub fn works(&self, campaign: &CampaignId) -> bool {
        self.campaigns.contains(campaign)
    }
}
