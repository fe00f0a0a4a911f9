//! Agent presence
//!
//! The dialer and the inbound router only read presence, through [`AgentDirectory`].
//! [`InMemoryAgentDirectory`] is the process-local implementation; deployments with an
//! external presence service implement the trait over it.
//!
//! An agent counts as available when logged in with status [`AgentStatus::Available`].
//! Pacing counts available agents assigned to the campaign; inbound routing considers
//! every available agent, longest idle first.

pub mod directory;
pub mod registry;
pub mod types;

pub use directory::AgentDirectory;
pub use registry::{AgentStats, InMemoryAgentDirectory};
pub use types::{Agent, AgentStatus};
