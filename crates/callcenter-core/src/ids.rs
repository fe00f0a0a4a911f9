//! Strongly-typed identifiers
//!
//! Every id in the core is an opaque string wrapped in its own type so a contact id can
//! never be passed where a call id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Internally generated call identifier
    CallId
);

string_id!(
    /// Identifier the telephony provider assigns once it accepts a call
    ProviderCallId
);

string_id!(
    /// Agent identifier
    AgentId
);

string_id!(
    /// Contact Store row identifier
    ContactId
);

string_id!(
    /// Outbound campaign identifier
    CampaignId
);

string_id!(
    /// Dial-queue entry identifier
    QueueEntryId
);

impl CallId {
    /// Allocate a fresh call id
    pub fn new() -> Self {
        CallId(format!("call-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueEntryId {
    pub fn new() -> Self {
        QueueEntryId(format!("dq-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}
