//! # Call Center Orchestration
//!
//! The [`CallCenterEngine`] owns every component and the background tasks that tie them
//! together; [`CallCenterEngineBuilder`] plugs in the provider and the external
//! collaborators (contact store, agent directory, call mirror).

pub mod builder;
pub mod engine;

pub use builder::CallCenterEngineBuilder;
pub use engine::{CallCenterEngine, CallCenterStats};
