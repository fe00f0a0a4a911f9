//! Call session types and the provider status vocabulary

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, CallId, CampaignId, ContactId, ProviderCallId};

/// Direction of a call relative to the call center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Inbound => write!(f, "inbound"),
            CallDirection::Outbound => write!(f, "outbound"),
        }
    }
}

/// Internal call status
///
/// Statuses are ordered by rank: `initiated` < `ringing` < `in_progress` < terminal.
/// A session only ever moves to a strictly higher rank, so the five terminal statuses
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Cancelled,
}

/// Provider status strings and the internal status each maps to. Matching is
/// case-insensitive; anything absent from the table maps to [`CallStatus::Failed`].
const PROVIDER_STATUS_TABLE: &[(&str, CallStatus)] = &[
    ("queued", CallStatus::Initiated),
    ("initiated", CallStatus::Initiated),
    ("ringing", CallStatus::Ringing),
    ("in-progress", CallStatus::InProgress),
    ("in_progress", CallStatus::InProgress),
    ("answered", CallStatus::InProgress),
    ("completed", CallStatus::Completed),
    ("busy", CallStatus::Busy),
    ("no-answer", CallStatus::NoAnswer),
    ("no_answer", CallStatus::NoAnswer),
    ("failed", CallStatus::Failed),
    ("canceled", CallStatus::Cancelled),
    ("cancelled", CallStatus::Cancelled),
];

impl CallStatus {
    /// Map a provider status string onto the internal vocabulary
    ///
    /// ```
    /// use callcenter_core::call::CallStatus;
    ///
    /// assert_eq!(CallStatus::from_provider("In-Progress"), CallStatus::InProgress);
    /// assert_eq!(CallStatus::from_provider("canceled"), CallStatus::Cancelled);
    /// assert_eq!(CallStatus::from_provider("something-new"), CallStatus::Failed);
    /// ```
    pub fn from_provider(status: &str) -> CallStatus {
        let status = status.trim();
        PROVIDER_STATUS_TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(status))
            .map(|(_, mapped)| *mapped)
            .unwrap_or(CallStatus::Failed)
    }

    /// Whether `status` is a provider string the table knows about
    pub fn is_known_provider_status(status: &str) -> bool {
        let status = status.trim();
        PROVIDER_STATUS_TABLE.iter().any(|(name, _)| name.eq_ignore_ascii_case(status))
    }

    pub fn rank(&self) -> u8 {
        match self {
            CallStatus::Initiated => 0,
            CallStatus::Ringing => 1,
            CallStatus::InProgress => 2,
            CallStatus::Completed
            | CallStatus::Busy
            | CallStatus::NoAnswer
            | CallStatus::Failed
            | CallStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// True when moving from `self` to `next` is forward progress
    pub fn can_advance_to(&self, next: CallStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no_answer",
            CallStatus::Failed => "failed",
            CallStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(CallStatus::Initiated),
            "ringing" => Ok(CallStatus::Ringing),
            "in_progress" => Ok(CallStatus::InProgress),
            "completed" => Ok(CallStatus::Completed),
            "busy" => Ok(CallStatus::Busy),
            "no_answer" => Ok(CallStatus::NoAnswer),
            "failed" => Ok(CallStatus::Failed),
            "cancelled" => Ok(CallStatus::Cancelled),
            other => Err(format!("Unknown call status: {}", other)),
        }
    }
}

/// Why a session reached a terminal status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum EndReason {
    /// Local hangup requested by an agent or operator
    Hangup,
    /// Provider pushed a terminal status
    Provider(CallStatus),
    /// Adapter retry exhausted
    AdapterUnreachable,
    /// Provider refused to place the call
    ProviderRejected,
    /// Dial released because no agent remained available
    NoAgentsAvailable,
    /// Dial released because its campaign stopped
    CampaignStopped,
    /// Connected outbound call with no agent to take it
    Abandoned,
    /// Sweeper: stuck in initiated/ringing
    RingingTimeout,
    /// Sweeper: in progress longer than the configured maximum
    MaxDurationExceeded,
}

impl EndReason {
    /// Terminal status implied by this reason given the session's current status
    pub fn terminal_status(&self, current: CallStatus) -> CallStatus {
        match self {
            EndReason::Hangup if current == CallStatus::InProgress => CallStatus::Completed,
            EndReason::Hangup => CallStatus::Cancelled,
            EndReason::Provider(status) if status.is_terminal() => *status,
            EndReason::Provider(_) => CallStatus::Failed,
            EndReason::AdapterUnreachable
            | EndReason::ProviderRejected
            | EndReason::MaxDurationExceeded => CallStatus::Failed,
            EndReason::NoAgentsAvailable | EndReason::CampaignStopped | EndReason::Abandoned => {
                CallStatus::Cancelled
            }
            EndReason::RingingTimeout => CallStatus::NoAnswer,
        }
    }

    /// Whether the provider leg may still be up and should be torn down
    pub fn needs_provider_hangup(&self) -> bool {
        matches!(
            self,
            EndReason::Hangup
                | EndReason::NoAgentsAvailable
                | EndReason::CampaignStopped
                | EndReason::Abandoned
                | EndReason::RingingTimeout
                | EndReason::MaxDurationExceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::Provider(_) => "provider_status",
            EndReason::AdapterUnreachable => "adapter_unreachable",
            EndReason::ProviderRejected => "provider_rejected",
            EndReason::NoAgentsAvailable => "no_agents_available",
            EndReason::CampaignStopped => "campaign_stopped",
            EndReason::Abandoned => "abandoned",
            EndReason::RingingTimeout => "ringing_timeout",
            EndReason::MaxDurationExceeded => "max_duration_exceeded",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mid-call control actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum CallAction {
    Hold,
    Unhold,
    Mute,
    Unmute,
    StartRecording,
    StopRecording,
    Transfer { target: String },
}

impl fmt::Display for CallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallAction::Hold => write!(f, "hold"),
            CallAction::Unhold => write!(f, "unhold"),
            CallAction::Mute => write!(f, "mute"),
            CallAction::Unmute => write!(f, "unmute"),
            CallAction::StartRecording => write!(f, "start_recording"),
            CallAction::StopRecording => write!(f, "stop_recording"),
            CallAction::Transfer { target } => write!(f, "transfer to {}", target),
        }
    }
}

/// One live call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: CallId,
    pub provider_call_id: Option<ProviderCallId>,
    pub direction: CallDirection,
    /// Remote party number
    pub phone_number: String,
    pub agent_id: Option<AgentId>,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    pub status: CallStatus,
    pub on_hold: bool,
    pub muted: bool,
    pub recording: bool,
    pub transfer_target: Option<String>,
    pub start_time: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CallSession {
    pub(crate) fn new(call: NewCall, status: CallStatus) -> Self {
        Self {
            id: CallId::new(),
            provider_call_id: call.provider_call_id,
            direction: call.direction,
            phone_number: call.phone_number,
            agent_id: call.agent_id,
            contact_id: call.contact_id,
            campaign_id: call.campaign_id,
            status,
            on_hold: false,
            muted: false,
            recording: false,
            transfer_target: None,
            start_time: Utc::now(),
            answered_at: None,
            end_time: None,
            end_reason: None,
            metadata: call.metadata,
        }
    }

    /// Wall-clock duration in whole seconds, once ended
    pub fn duration_secs(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds().max(0))
    }

    /// Seconds spent talking, once ended. Zero for calls that never connected.
    pub fn talk_time_secs(&self) -> Option<i64> {
        let end = self.end_time?;
        Some(
            self.answered_at
                .map(|answered| (end - answered).num_seconds().max(0))
                .unwrap_or(0),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.status == CallStatus::InProgress
    }
}

/// Parameters for creating a session
#[derive(Debug, Clone)]
pub struct NewCall {
    pub direction: CallDirection,
    pub phone_number: String,
    pub provider_call_id: Option<ProviderCallId>,
    pub agent_id: Option<AgentId>,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    pub metadata: HashMap<String, String>,
}

impl NewCall {
    pub fn outbound(phone_number: impl Into<String>) -> Self {
        Self {
            direction: CallDirection::Outbound,
            phone_number: phone_number.into(),
            provider_call_id: None,
            agent_id: None,
            contact_id: None,
            campaign_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn inbound(provider_call_id: ProviderCallId, phone_number: impl Into<String>) -> Self {
        Self {
            direction: CallDirection::Inbound,
            phone_number: phone_number.into(),
            provider_call_id: Some(provider_call_id),
            agent_id: None,
            contact_id: None,
            campaign_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_contact(mut self, contact_id: ContactId) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn with_campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Record written to the call-record sink when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCallRecord {
    pub call_id: CallId,
    pub provider_call_id: Option<ProviderCallId>,
    pub direction: CallDirection,
    pub phone_number: String,
    pub agent_id: Option<AgentId>,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    pub status: CallStatus,
    pub end_reason: Option<EndReason>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: i64,
    pub talk_time_secs: i64,
}

impl CompletedCallRecord {
    /// Build a record from an ended session; `None` while the session is live
    pub fn from_session(session: &CallSession) -> Option<Self> {
        let end_time = session.end_time?;
        Some(Self {
            call_id: session.id.clone(),
            provider_call_id: session.provider_call_id.clone(),
            direction: session.direction,
            phone_number: session.phone_number.clone(),
            agent_id: session.agent_id.clone(),
            contact_id: session.contact_id.clone(),
            campaign_id: session.campaign_id.clone(),
            status: session.status,
            end_reason: session.end_reason.clone(),
            start_time: session.start_time,
            end_time,
            duration_secs: session.duration_secs().unwrap_or(0),
            talk_time_secs: session.talk_time_secs().unwrap_or(0),
        })
    }
}

/// Lifecycle event broadcast by the registry
#[derive(Debug, Clone)]
pub enum CallLifecycleEvent {
    Created(CallSession),
    StatusChanged {
        session: CallSession,
        previous: CallStatus,
    },
    /// Hold / mute / recording / transfer / agent assignment changed
    Updated(CallSession),
    Ended(CallSession),
}

impl CallLifecycleEvent {
    pub fn session(&self) -> &CallSession {
        match self {
            CallLifecycleEvent::Created(s)
            | CallLifecycleEvent::Updated(s)
            | CallLifecycleEvent::Ended(s) => s,
            CallLifecycleEvent::StatusChanged { session, .. } => session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_table_is_case_insensitive() {
        assert_eq!(CallStatus::from_provider("RINGING"), CallStatus::Ringing);
        assert_eq!(CallStatus::from_provider(" no-answer "), CallStatus::NoAnswer);
        assert_eq!(CallStatus::from_provider("Queued"), CallStatus::Initiated);
        assert!(CallStatus::is_known_provider_status("Busy"));
        assert!(!CallStatus::is_known_provider_status("teleported"));
        assert_eq!(CallStatus::from_provider("teleported"), CallStatus::Failed);
    }

    #[test]
    fn test_every_internal_status_is_reachable_from_provider() {
        for status in [
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::Busy,
            CallStatus::NoAnswer,
            CallStatus::Failed,
            CallStatus::Cancelled,
        ] {
            assert!(
                PROVIDER_STATUS_TABLE.iter().any(|(_, mapped)| *mapped == status),
                "{} has no provider spelling",
                status
            );
        }
    }

    #[test]
    fn test_rank_is_monotone() {
        assert!(CallStatus::Initiated.can_advance_to(CallStatus::Ringing));
        assert!(CallStatus::Ringing.can_advance_to(CallStatus::InProgress));
        assert!(CallStatus::Initiated.can_advance_to(CallStatus::Busy));
        assert!(!CallStatus::InProgress.can_advance_to(CallStatus::Ringing));
        assert!(!CallStatus::Completed.can_advance_to(CallStatus::Failed));
        assert!(!CallStatus::Ringing.can_advance_to(CallStatus::Ringing));
    }

    #[test]
    fn test_end_reason_status() {
        assert_eq!(EndReason::Hangup.terminal_status(CallStatus::InProgress), CallStatus::Completed);
        assert_eq!(EndReason::Hangup.terminal_status(CallStatus::Ringing), CallStatus::Cancelled);
        assert_eq!(
            EndReason::Provider(CallStatus::Busy).terminal_status(CallStatus::Ringing),
            CallStatus::Busy
        );
        assert_eq!(
            EndReason::AdapterUnreachable.terminal_status(CallStatus::Initiated),
            CallStatus::Failed
        );
        assert_eq!(
            EndReason::RingingTimeout.terminal_status(CallStatus::Ringing),
            CallStatus::NoAnswer
        );
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        let json = serde_json::to_string(&CallStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let back: CallStatus = "no_answer".parse().unwrap();
        assert_eq!(back, CallStatus::NoAnswer);
    }

    #[test]
    fn test_durations() {
        let mut session = CallSession::new(NewCall::outbound("+15551234567"), CallStatus::Initiated);
        assert_eq!(session.duration_secs(), None);

        session.answered_at = Some(session.start_time + chrono::Duration::seconds(5));
        session.end_time = Some(session.start_time + chrono::Duration::seconds(65));
        assert_eq!(session.duration_secs(), Some(65));
        assert_eq!(session.talk_time_secs(), Some(60));

        let record = CompletedCallRecord::from_session(&session).unwrap();
        assert_eq!(record.duration_secs, 65);
    }
}
