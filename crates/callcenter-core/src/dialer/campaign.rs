use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::CampaignId;

/// Campaign run state. Only `Active` campaigns have a running control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Stopped,
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// How aggressively a campaign dials relative to agent availability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum PacingStrategy {
    /// At most one new dial per idle agent
    Progressive,
    /// `floor(available × dial_ratio)` dials in flight
    Predictive { dial_ratio: f64 },
    /// As many as the contact store yields, up to the hard ceiling
    Power,
}

impl Default for PacingStrategy {
    fn default() -> Self {
        PacingStrategy::Progressive
    }
}

impl fmt::Display for PacingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacingStrategy::Progressive => write!(f, "progressive"),
            PacingStrategy::Predictive { dial_ratio } => write!(f, "predictive({:.2})", dial_ratio),
            PacingStrategy::Power => write!(f, "power"),
        }
    }
}

/// Outbound campaign definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub pacing: PacingStrategy,
    /// Per-agent concurrency ceiling; the dialer default applies when unset
    pub max_calls_per_agent: Option<u32>,
    /// Power-pacing ceiling; the dialer default applies when unset
    pub power_dial_ceiling: Option<u32>,
    /// Caller id presented on this campaign's calls
    pub caller_id: Option<String>,
}

impl Campaign {
    pub fn new(id: impl Into<CampaignId>, name: impl Into<String>, pacing: PacingStrategy) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: CampaignStatus::Paused,
            pacing,
            max_calls_per_agent: None,
            power_dial_ceiling: None,
            caller_id: None,
        }
    }

    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    pub fn with_max_calls_per_agent(mut self, max: u32) -> Self {
        self.max_calls_per_agent = Some(max);
        self
    }
}
