use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::ids::{AgentId, CampaignId};

use super::types::Agent;

/// Read side of agent presence, as the dialer and inbound router see it
///
/// Implementations may sit on top of an external presence service. Answers are point in
/// time; callers re-query every tick rather than caching.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Available agents working `campaign`
    async fn count_available(&self, campaign: &CampaignId) -> Result<usize>;

    /// Available agents working `campaign`, longest idle first
    async fn list_available(&self, campaign: &CampaignId) -> Result<Vec<AgentId>>;

    async fn is_available(&self, agent: &AgentId) -> Result<bool>;

    /// Every available agent regardless of campaign, longest idle first
    async fn list_available_any(&self) -> Result<Vec<AgentId>>;

    async fn get(&self, agent: &AgentId) -> Result<Option<Agent>>;

    /// Version counter bumped on every presence change, for loops that want to react
    /// before their next tick
    fn watch_changes(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}
