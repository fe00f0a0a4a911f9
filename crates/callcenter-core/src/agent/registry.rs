//! # In-Memory Agent Directory
//!
//! Process-local agent presence. Presence changes (login, logout, status) are visible to
//! the next query immediately and bump a version counter that campaign loops watch so a
//! newly available agent is picked up before the next scheduled tick.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::error::{CallCenterError, Result};
use crate::ids::{AgentId, CampaignId};

use super::directory::AgentDirectory;
use super::types::{Agent, AgentStatus};

/// Agent directory backed by a concurrent map
///
/// # Examples
///
/// ```
/// use callcenter_core::agent::{Agent, AgentDirectory, AgentStatus, InMemoryAgentDirectory};
/// use callcenter_core::ids::CampaignId;
///
/// # async fn example() -> callcenter_core::Result<()> {
/// let directory = InMemoryAgentDirectory::new();
/// directory.register_agent(Agent::new("agent-001", "Alice").with_campaign("spring-renewals"))?;
/// directory.login(&"agent-001".into())?;
///
/// let campaign = CampaignId::from("spring-renewals");
/// assert_eq!(directory.count_available(&campaign).await?, 1);
///
/// directory.update_agent_status(&"agent-001".into(), AgentStatus::Busy)?;
/// assert_eq!(directory.count_available(&campaign).await?, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryAgentDirectory {
    agents: Arc<DashMap<AgentId, Agent>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryAgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            agents: Arc::new(DashMap::new()),
            changes: Arc::new(changes),
        }
    }

    fn bump(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Register or replace an agent profile
    pub fn register_agent(&self, mut agent: Agent) -> Result<AgentId> {
        if agent.id.as_str().trim().is_empty() {
            return Err(CallCenterError::validation("agent id cannot be empty"));
        }
        info!("👤 Registering agent: {} ({})", agent.display_name, agent.endpoint);
        if agent.is_available() && agent.available_since.is_none() {
            agent.available_since = Some(Utc::now());
        }
        let agent_id = agent.id.clone();
        self.agents.insert(agent_id.clone(), agent);
        self.bump();
        Ok(agent_id)
    }

    pub fn remove_agent(&self, agent_id: &AgentId) -> Result<Agent> {
        let (_, agent) = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| CallCenterError::not_found(format!("Agent not found: {}", agent_id)))?;
        self.bump();
        Ok(agent)
    }

    /// Log in and become available
    pub fn login(&self, agent_id: &AgentId) -> Result<()> {
        self.with_agent(agent_id, |agent| {
            agent.logged_in = true;
            set_status(agent, AgentStatus::Available);
        })?;
        info!("🔑 Agent {} logged in", agent_id);
        Ok(())
    }

    pub fn logout(&self, agent_id: &AgentId) -> Result<()> {
        self.with_agent(agent_id, |agent| {
            agent.logged_in = false;
            set_status(agent, AgentStatus::Offline);
        })?;
        info!("🚪 Agent {} logged out", agent_id);
        Ok(())
    }

    pub fn update_agent_status(&self, agent_id: &AgentId, status: AgentStatus) -> Result<()> {
        info!("🔄 Agent {} status: {}", agent_id, status);
        self.with_agent(agent_id, |agent| set_status(agent, status))
    }

    pub fn assign_campaign(&self, agent_id: &AgentId, campaign: CampaignId) -> Result<()> {
        self.with_agent(agent_id, |agent| {
            agent.campaigns.insert(campaign);
        })
    }

    pub fn unassign_campaign(&self, agent_id: &AgentId, campaign: &CampaignId) -> Result<()> {
        self.with_agent(agent_id, |agent| {
            agent.campaigns.remove(campaign);
        })
    }

    fn with_agent<F>(&self, agent_id: &AgentId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Agent),
    {
        {
            let mut agent = self
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| CallCenterError::not_found(format!("Agent not found: {}", agent_id)))?;
            f(&mut agent);
        }
        self.bump();
        Ok(())
    }

    fn ranked_available<P>(&self, filter: P) -> Vec<AgentId>
    where
        P: Fn(&Agent) -> bool,
    {
        let mut available: Vec<(Option<chrono::DateTime<Utc>>, AgentId)> = self
            .agents
            .iter()
            .filter(|a| a.is_available() && filter(a.value()))
            .map(|a| (a.available_since, a.id.clone()))
            .collect();
        // Longest idle first; ties broken by id for a stable order
        available.sort();
        available.into_iter().map(|(_, id)| id).collect()
    }

    pub fn get_statistics(&self) -> AgentStats {
        let mut stats = AgentStats {
            total: self.agents.len(),
            ..Default::default()
        };
        for agent in self.agents.iter() {
            match agent.status {
                _ if !agent.logged_in => stats.offline += 1,
                AgentStatus::Available => stats.available += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::PostCallWrapUp => stats.post_call_wrap_up += 1,
                AgentStatus::Break => stats.on_break += 1,
                AgentStatus::Offline => stats.offline += 1,
            }
        }
        stats
    }
}

fn set_status(agent: &mut Agent, status: AgentStatus) {
    if status == AgentStatus::Available {
        if agent.status != AgentStatus::Available || agent.available_since.is_none() {
            agent.available_since = Some(Utc::now());
        }
    } else {
        agent.available_since = None;
    }
    agent.status = status;
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn count_available(&self, campaign: &CampaignId) -> Result<usize> {
        Ok(self
            .agents
            .iter()
            .filter(|a| a.is_available() && a.works(campaign))
            .count())
    }

    async fn list_available(&self, campaign: &CampaignId) -> Result<Vec<AgentId>> {
        Ok(self.ranked_available(|a| a.works(campaign)))
    }

    async fn is_available(&self, agent: &AgentId) -> Result<bool> {
        Ok(self.agents.get(agent).map(|a| a.is_available()).unwrap_or(false))
    }

    async fn list_available_any(&self) -> Result<Vec<AgentId>> {
        Ok(self.ranked_available(|_| true))
    }

    async fn get(&self, agent: &AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.get(agent).map(|a| a.clone()))
    }

    fn watch_changes(&self) -> Option<watch::Receiver<u64>> {
        Some(self.changes.subscribe())
    }
}

/// Agent status distribution
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStats {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub post_call_wrap_up: usize,
    pub on_break: usize,
    pub offline: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_availability_requires_login() {
        let directory = InMemoryAgentDirectory::new();
        let mut agent = Agent::new("a1", "Alice").with_campaign("c1");
        agent.status = AgentStatus::Available;
        directory.register_agent(agent).unwrap();

        let campaign = CampaignId::from("c1");
        assert_eq!(directory.count_available(&campaign).await.unwrap(), 0);

        directory.login(&"a1".into()).unwrap();
        assert_eq!(directory.count_available(&campaign).await.unwrap(), 1);
        assert_eq!(directory.count_available(&"other".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_longest_idle_first() {
        let directory = InMemoryAgentDirectory::new();
        for id in ["a1", "a2", "a3"] {
            directory.register_agent(Agent::new(id, id).with_campaign("c1")).unwrap();
        }
        directory.login(&"a2".into()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        directory.login(&"a3".into()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        directory.login(&"a1".into()).unwrap();

        let ranked = directory.list_available_any().await.unwrap();
        assert_eq!(ranked, vec![AgentId::from("a2"), AgentId::from("a3"), AgentId::from("a1")]);
    }

    #[tokio::test]
    async fn test_presence_changes_bump_version() {
        let directory = InMemoryAgentDirectory::new();
        let mut changes = directory.watch_changes().unwrap();
        directory.register_agent(Agent::new("a1", "Alice")).unwrap();
        directory.login(&"a1".into()).unwrap();

        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();
        directory.update_agent_status(&"a1".into(), AgentStatus::Break).unwrap();
        assert!(changes.has_changed().unwrap());
    }

    #[test]
    fn test_statistics() {
        let directory = InMemoryAgentDirectory::new();
        directory.register_agent(Agent::new("a1", "A")).unwrap();
        directory.register_agent(Agent::new("a2", "B")).unwrap();
        directory.login(&"a1".into()).unwrap();

        let stats = directory.get_statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.available, 1);
        assert_eq!(stats.offline, 1);
        assert!(directory.update_agent_status(&"ghost".into(), AgentStatus::Busy).is_err());
    }
}
