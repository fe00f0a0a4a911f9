use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallCenterError, Result};

/// Call center configuration
///
/// Every section has production-leaning defaults, so a TOML file only needs to name
/// the values it overrides.
///
/// # Configuration Sections
///
/// - [`general`](CallCenterConfig::general): instance identity and HTTP listen address
/// - [`call`](CallCenterConfig::call): liveness bounds for non-terminal call states
/// - [`dialer`](CallCenterConfig::dialer): admission-control tick, pacing ceilings, retry policy
/// - [`inbound`](CallCenterConfig::inbound): callback detection and ring timeout
/// - [`provider`](CallCenterConfig::provider): telephony adapter timeouts and webhook secret
/// - [`database`](CallCenterConfig::database): durable mirror location
/// - [`notifications`](CallCenterConfig::notifications): fan-out channel sizing
///
/// # Examples
///
/// ```
/// use callcenter_core::config::CallCenterConfig;
///
/// let config = CallCenterConfig::from_toml_str(r#"
///     [dialer]
///     tick_interval_ms = 1000
///     power_dial_ceiling = 5
/// "#).unwrap();
///
/// assert_eq!(config.dialer.tick_interval_ms, 1000);
/// assert_eq!(config.dialer.default_max_calls_per_agent, 3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallCenterConfig {
    pub general: GeneralConfig,
    pub call: CallConfig,
    pub dialer: DialerConfig,
    pub inbound: InboundConfig,
    pub provider: ProviderConfig,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
}

/// General process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Identity of this process. Written into contact locks as the owner so a stale
    /// lock can be traced back to the worker that took it.
    pub instance_id: String,

    /// Address the webhook / real-time HTTP surface binds to
    pub listen_addr: String,
}

/// Liveness bounds for call sessions
///
/// No session may sit in `initiated`/`ringing` or `in_progress` forever; the sweeper
/// forces a terminal transition once these bounds are exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Seconds a session may stay `initiated` or `ringing` before it is forced to `no_answer`
    pub ringing_timeout_secs: u64,

    /// Seconds a session may stay `in_progress` before it is forced to `failed`
    pub max_call_duration_secs: u64,

    /// How often the liveness sweeper runs
    pub sweep_interval_secs: u64,
}

/// Dial-queue admission control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Control-loop tick in milliseconds
    pub tick_interval_ms: u64,

    /// Age in seconds after which a contact lock may be force-released
    pub lock_staleness_secs: u64,

    /// Per-agent concurrency ceiling used when a campaign does not set its own
    pub default_max_calls_per_agent: u32,

    /// Hard ceiling on dials per tick for Power pacing (provider rate-limit guard)
    pub power_dial_ceiling: u32,

    /// Minimum seconds between two attempts on the same contact
    pub retry_cooldown_secs: u64,

    /// Attempt ceiling used when a campaign does not set its own
    pub default_max_attempts: u32,

    /// Create a fresh queue entry when an attempt ends busy / no-answer / failed and the
    /// contact is still under its attempt ceiling
    pub requeue_failed_attempts: bool,

    /// Finished entries each campaign queue keeps for inspection; older ones are dropped
    pub queue_history_limit: usize,
}

/// Inbound routing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// A caller dialed outbound within this many seconds is treated as a callback
    pub callback_window_secs: u64,

    /// Callback callers with at least this many outbound attempts are routed as urgent
    pub urgent_attempt_threshold: u32,

    /// Seconds a ringing inbound call waits for a claim before it overflows
    pub ring_timeout_secs: u64,

    /// Budget in milliseconds for the synchronous part of webhook handling
    pub response_budget_ms: u64,

    /// Audio played to parked callers
    pub hold_music_url: String,

    /// Provider queue parked callers are placed in
    pub overflow_queue: String,
}

/// Telephony provider adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Per-request deadline for provider API calls
    pub request_timeout_ms: u64,

    /// Backoff before the single retry of a transient failure
    pub retry_backoff_ms: u64,

    /// Shared secret for webhook verification and instruction signing
    pub webhook_secret: String,

    /// Externally reachable base URL of this service (used to build callback URLs and
    /// to recompute webhook signatures)
    pub public_base_url: String,

    /// Caller id presented on outbound calls when the campaign has none
    pub caller_id: String,

    /// Reject webhooks whose signature does not verify
    pub validate_signatures: bool,
}

/// Durable mirror settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Mirror live calls and completed-call records to SQLite
    pub enabled: bool,

    /// sqlx connection URL, e.g. `sqlite://callcenter.db` or `sqlite::memory:`
    pub database_url: String,
}

/// Notification fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-topic broadcast buffer; slow subscribers lose the oldest messages
    pub channel_capacity: usize,
}

impl CallCenterConfig {
    /// Parse a configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| CallCenterError::configuration(format!("invalid TOML: {}", e)))
    }

    /// Load and validate a configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CallCenterError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    ///
    /// ```
    /// use callcenter_core::config::CallCenterConfig;
    ///
    /// let mut config = CallCenterConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.dialer.tick_interval_ms = 0;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.general.instance_id.trim().is_empty() {
            return Err(CallCenterError::configuration("general.instance_id cannot be empty"));
        }

        if self.dialer.tick_interval_ms == 0 {
            return Err(CallCenterError::configuration("dialer.tick_interval_ms must be greater than 0"));
        }

        if self.dialer.default_max_calls_per_agent == 0 {
            return Err(CallCenterError::configuration(
                "dialer.default_max_calls_per_agent must be greater than 0",
            ));
        }

        if self.dialer.default_max_attempts == 0 {
            return Err(CallCenterError::configuration("dialer.default_max_attempts must be greater than 0"));
        }

        if self.dialer.lock_staleness_secs == 0 {
            return Err(CallCenterError::configuration("dialer.lock_staleness_secs must be greater than 0"));
        }

        if self.provider.request_timeout_ms == 0 {
            return Err(CallCenterError::configuration("provider.request_timeout_ms must be greater than 0"));
        }

        // The lock must outlive a full place-call round trip (two attempts plus backoff)
        // or the staleness recovery would steal locks from dials still in flight.
        let worst_dial_ms = self.provider.request_timeout_ms * 2 + self.provider.retry_backoff_ms;
        if self.dialer.lock_staleness_secs * 1000 <= worst_dial_ms {
            return Err(CallCenterError::configuration(format!(
                "dialer.lock_staleness_secs ({}s) must exceed the worst-case dial time ({}ms)",
                self.dialer.lock_staleness_secs, worst_dial_ms
            )));
        }

        if self.inbound.ring_timeout_secs == 0 {
            return Err(CallCenterError::configuration("inbound.ring_timeout_secs must be greater than 0"));
        }

        if self.inbound.response_budget_ms == 0 || self.inbound.response_budget_ms > 10_000 {
            return Err(CallCenterError::configuration(
                "inbound.response_budget_ms must be between 1 and 10000",
            ));
        }

        if self.call.ringing_timeout_secs == 0 || self.call.max_call_duration_secs == 0 {
            return Err(CallCenterError::configuration("call timeouts must be greater than 0"));
        }

        if self.provider.validate_signatures && self.provider.webhook_secret.is_empty() {
            return Err(CallCenterError::configuration(
                "provider.webhook_secret is required when validate_signatures is enabled",
            ));
        }

        if self.database.enabled && self.database.database_url.is_empty() {
            return Err(CallCenterError::configuration("database.database_url cannot be empty"));
        }

        if self.notifications.channel_capacity == 0 {
            return Err(CallCenterError::configuration("notifications.channel_capacity must be greater than 0"));
        }

        Ok(())
    }
}

impl CallConfig {
    pub fn ringing_timeout(&self) -> Duration {
        Duration::from_secs(self.ringing_timeout_secs)
    }

    pub fn max_call_duration(&self) -> Duration {
        Duration::from_secs(self.max_call_duration_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl DialerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn lock_staleness(&self) -> Duration {
        Duration::from_secs(self.lock_staleness_secs)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }
}

impl InboundConfig {
    pub fn callback_window(&self) -> Duration {
        Duration::from_secs(self.callback_window_secs)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn response_budget(&self) -> Duration {
        Duration::from_millis(self.response_budget_ms)
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Absolute URL the provider should post status callbacks to
    ///
    /// ```
    /// use callcenter_core::config::ProviderConfig;
    ///
    /// let config = ProviderConfig::default();
    /// assert_eq!(config.status_callback_url(), "http://127.0.0.1:8080/webhooks/voice/status");
    /// ```
    pub fn status_callback_url(&self) -> String {
        format!("{}/webhooks/voice/status", self.public_base_url.trim_end_matches('/'))
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            instance_id: "callcenter-1".to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ringing_timeout_secs: 60,
            max_call_duration_secs: 4 * 3600,
            sweep_interval_secs: 5,
        }
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2000,
            lock_staleness_secs: 300,
            default_max_calls_per_agent: 3,
            power_dial_ceiling: 20,
            retry_cooldown_secs: 900, // 15 minutes
            default_max_attempts: 3,
            requeue_failed_attempts: true,
            queue_history_limit: 1000,
        }
    }
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            callback_window_secs: 3600,
            urgent_attempt_threshold: 3,
            ring_timeout_secs: 30,
            response_budget_ms: 1500,
            hold_music_url: "https://media.invalid/hold.mp3".to_string(),
            overflow_queue: "overflow".to_string(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            retry_backoff_ms: 250,
            webhook_secret: String::new(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            caller_id: "+15550000000".to_string(),
            validate_signatures: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_url: "sqlite::memory:".to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}
