use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallSession, CallStatus, EndReason};
use crate::config::DialerConfig;
use crate::ids::{AgentId, CallId, CampaignId, ContactId};

/// Exclusive dialing claim on a contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactLock {
    /// Worker that took the lock
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

/// How a dial attempt on a contact ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Connected,
    Busy,
    NoAnswer,
    Failed,
    ProviderRejected,
    AdapterUnreachable,
    /// Released before it connected (campaign stopped, no agents)
    Cancelled,
}

impl AttemptOutcome {
    /// Outcome recorded for a call that ended in `status`
    pub fn from_call_status(status: CallStatus) -> Self {
        match status {
            CallStatus::Completed | CallStatus::InProgress => AttemptOutcome::Connected,
            CallStatus::Busy => AttemptOutcome::Busy,
            CallStatus::NoAnswer => AttemptOutcome::NoAnswer,
            CallStatus::Cancelled => AttemptOutcome::Cancelled,
            CallStatus::Failed | CallStatus::Initiated | CallStatus::Ringing => AttemptOutcome::Failed,
        }
    }

    /// Outcome for an ended dial, using the end reason where the status alone is ambiguous
    pub fn from_session(session: &CallSession) -> Self {
        match &session.end_reason {
            Some(EndReason::ProviderRejected) => AttemptOutcome::ProviderRejected,
            Some(EndReason::AdapterUnreachable) => AttemptOutcome::AdapterUnreachable,
            // answered but nobody to take it
            Some(EndReason::Abandoned) => AttemptOutcome::Failed,
            _ => AttemptOutcome::from_call_status(session.status),
        }
    }

    /// The contact was reached; nothing left to retry
    pub fn reached(&self) -> bool {
        matches!(self, AttemptOutcome::Connected)
    }

    /// Worth another attempt after the cooldown
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Busy
                | AttemptOutcome::NoAnswer
                | AttemptOutcome::Failed
                | AttemptOutcome::AdapterUnreachable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Connected => "connected",
            AttemptOutcome::Busy => "busy",
            AttemptOutcome::NoAnswer => "no_answer",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::ProviderRejected => "provider_rejected",
            AttemptOutcome::AdapterUnreachable => "adapter_unreachable",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dial attempt, recorded when the dial is placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub call_id: CallId,
    pub at: DateTime<Utc>,
}

/// A dialable person in a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub campaign_id: CampaignId,
    pub phone_number: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,

    /// Dial attempts made so far
    pub attempts: u32,
    /// Overrides the store-wide attempt ceiling
    pub max_attempts: Option<u32>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_call_id: Option<CallId>,
    pub last_outcome: Option<AttemptOutcome>,
    /// Agent who last spoke to this contact on an outbound call
    pub last_agent_id: Option<AgentId>,

    pub lock: Option<ContactLock>,

    /// Cleared once the contact is reached, refused by the provider, or out of attempts
    pub dialable: bool,
}

impl Contact {
    pub fn new(
        id: impl Into<ContactId>,
        campaign_id: impl Into<CampaignId>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            campaign_id: campaign_id.into(),
            phone_number: phone_number.into(),
            display_name: None,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: None,
            last_attempt_at: None,
            last_call_id: None,
            last_outcome: None,
            last_agent_id: None,
            lock: None,
            dialable: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

/// Attempt ceiling and cooldown between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    /// Campaign-independent defaults from the dialer settings
    pub fn from_config(config: &DialerConfig) -> Self {
        Self {
            max_attempts: config.default_max_attempts,
            cooldown: config.retry_cooldown(),
        }
    }

    pub fn max_attempts_for(&self, contact: &Contact) -> u32 {
        contact.max_attempts.unwrap_or(self.max_attempts)
    }

    /// Unlocked, still dialable, under its ceiling and past the cooldown
    pub fn is_eligible(&self, contact: &Contact, now: DateTime<Utc>) -> bool {
        if !contact.dialable || contact.lock.is_some() {
            return false;
        }
        if contact.attempts >= self.max_attempts_for(contact) {
            return false;
        }
        match contact.last_attempt_at {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= self.cooldown)
                .unwrap_or(false),
        }
    }
}

/// Reduce a phone number to `+` and digits for lookups
///
/// ```
/// use callcenter_core::contacts::normalize_phone;
///
/// assert_eq!(normalize_phone("+1 (555) 123-4567"), "+15551234567");
/// assert_eq!(normalize_phone("555.123.4567"), "5551234567");
/// ```
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    out
}
