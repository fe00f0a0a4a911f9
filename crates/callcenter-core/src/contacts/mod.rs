//! Contacts, per-contact dialing locks and retry eligibility

pub mod store;
pub mod types;

pub use store::{ContactStore, InMemoryContactStore};
pub use types::{
    normalize_phone, AttemptOutcome, AttemptRecord, Contact, ContactLock, RetryPolicy,
};
