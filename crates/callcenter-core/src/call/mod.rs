//! Call sessions and the live-call registry

pub mod registry;
pub mod store;
pub mod types;

pub use registry::{CallRegistry, RegistryStats};
pub use store::{CallRecordSink, CallStore, MemoryCallStore};
pub use types::{
    CallAction, CallDirection, CallLifecycleEvent, CallSession, CallStatus, CompletedCallRecord,
    EndReason, NewCall,
};
