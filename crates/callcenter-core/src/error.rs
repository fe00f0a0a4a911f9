use thiserror::Error;

/// Error taxonomy for the call center core
///
/// The first five variants are the orchestration taxonomy every component agrees on:
/// they decide whether a failure is retried, skipped, or surfaced as a terminal
/// call / queue-entry status. The remaining variants cover lookups, configuration and
/// storage.
///
/// # Examples
///
/// ```
/// use callcenter_core::{CallCenterError, Result};
///
/// fn dial() -> Result<()> {
///     Err(CallCenterError::adapter_unavailable("connect timeout"))
/// }
///
/// match dial() {
///     Err(e) if e.is_transient() => println!("retry later: {}", e),
///     Err(e) => println!("permanent: {}", e),
///     Ok(()) => {}
/// }
/// ```
#[derive(Error, Debug, Clone)]
pub enum CallCenterError {
    /// The telephony provider could not be reached or did not answer in time.
    ///
    /// Transient: the Call Control Adapter retries once with backoff, then the call is
    /// terminated locally with reason `adapter_unreachable`.
    #[error("Telephony adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// An action was requested that the call's current status does not admit.
    ///
    /// Indicates a race or a caller bug. The call state is left untouched.
    #[error("Invalid state transition for call {call_id}: cannot {action} while {from}")]
    InvalidStateTransition {
        call_id: String,
        from: String,
        action: String,
    },

    /// Another worker holds the contact lock. Expected under concurrency; the
    /// admission loop skips the contact and retries on the next tick.
    #[error("Contact {0} is locked by another worker")]
    LockContention(String),

    /// The provider refused the request. Permanent for this attempt.
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    /// Webhook signature did not verify. The request is rejected without mutating state.
    #[error("Webhook signature invalid")]
    WebhookSignatureInvalid,

    /// A ringing call was already claimed by another agent.
    #[error("Call {call_id} already claimed by agent {agent_id}")]
    AlreadyClaimed { call_id: String, agent_id: String },

    /// Requested call, campaign, contact or agent does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration failed validation or could not be parsed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Durable mirror / record sink failure.
    #[error("Database error: {0}")]
    Database(String),

    /// An operation exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Input rejected by validation (bad phone number, empty id, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for CallCenterError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl CallCenterError {
    pub fn adapter_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::AdapterUnavailable(msg.into())
    }

    pub fn provider_rejected<S: Into<String>>(msg: S) -> Self {
        Self::ProviderRejected(msg.into())
    }

    /// Build an [`CallCenterError::InvalidStateTransition`]
    pub fn invalid_transition(
        call_id: impl Into<String>,
        from: impl std::fmt::Display,
        action: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidStateTransition {
            call_id: call_id.into(),
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the same request may succeed.
    ///
    /// ```
    /// use callcenter_core::CallCenterError;
    ///
    /// assert!(CallCenterError::timeout("place_call").is_transient());
    /// assert!(!CallCenterError::provider_rejected("invalid number").is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AdapterUnavailable(_) | Self::Timeout(_))
    }
}

/// Result type for call center operations
pub type Result<T> = std::result::Result<T, CallCenterError>;
