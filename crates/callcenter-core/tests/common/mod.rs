//! Shared fixtures for the scenario tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use callcenter_core::prelude::*;

pub const CAMPAIGN: &str = "renewals";

/// Engine plus handles on the in-memory collaborators behind it
pub struct TestCenter {
    pub engine: Arc<CallCenterEngine>,
    pub provider: Arc<SimulatedProvider>,
    pub agents: Arc<InMemoryAgentDirectory>,
    pub contacts: Arc<InMemoryContactStore>,
}

/// Fast provider deadlines, no retry cooldown, loops that only run when ticked by hand
pub fn test_config() -> CallCenterConfig {
    let mut config = CallCenterConfig::default();
    config.provider.request_timeout_ms = 50;
    config.provider.retry_backoff_ms = 5;
    config.dialer.retry_cooldown_secs = 0;
    config.dialer.tick_interval_ms = 60_000;
    config
}

pub async fn center() -> TestCenter {
    center_with(test_config()).await
}

pub async fn center_with(config: CallCenterConfig) -> TestCenter {
    let provider = Arc::new(SimulatedProvider::new());
    let agents = Arc::new(InMemoryAgentDirectory::new());
    let contacts = Arc::new(InMemoryContactStore::new());
    let engine = CallCenterEngine::builder()
        .with_config(config)
        .with_provider(provider.clone())
        .with_agent_directory(agents.clone())
        .with_contact_store(contacts.clone())
        .build()
        .await
        .expect("engine builds");
    TestCenter {
        engine,
        provider,
        agents,
        contacts,
    }
}

impl TestCenter {
    /// Register and log in `count` agents working the test campaign
    pub fn agents_online(&self, count: usize) -> Vec<AgentId> {
        (0..count)
            .map(|i| {
                let id = format!("agent-{}", i);
                let agent_id = self
                    .agents
                    .register_agent(Agent::new(id.as_str(), id.as_str()).with_campaign(CAMPAIGN))
                    .expect("agent registers");
                self.agents.login(&agent_id).expect("agent logs in");
                agent_id
            })
            .collect()
    }

    /// Add a paused campaign with the given pacing
    pub async fn campaign(&self, pacing: PacingStrategy) -> CampaignId {
        let campaign = Campaign::new(CAMPAIGN, "Policy renewals", pacing);
        self.engine
            .dialer()
            .add_campaign(campaign)
            .await
            .expect("campaign added");
        CampaignId::from(CAMPAIGN)
    }

    /// Load `count` contacts into the store and the campaign's dial queue
    pub async fn queue_contacts(&self, count: usize) -> Vec<ContactId> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let contact = Contact::new(format!("contact-{}", i), CAMPAIGN, phone(i));
            let id = contact.id.clone();
            self.contacts.insert(contact);
            self.engine
                .dialer()
                .enqueue(&CAMPAIGN.into(), id.clone(), 5, None)
                .await
                .expect("contact enqueued");
            ids.push(id);
        }
        ids
    }

    /// Mark the test campaign active without starting its timer loop
    pub async fn activate(&self) {
        self.engine
            .dialer()
            .controller(&CAMPAIGN.into())
            .expect("campaign exists")
            .set_status(CampaignStatus::Active)
            .await;
    }

    pub async fn tick(&self) -> callcenter_core::dialer::TickReport {
        self.engine
            .dialer()
            .tick_campaign(&CAMPAIGN.into())
            .await
            .expect("tick runs")
    }

    pub async fn queue(&self) -> Vec<DialQueueEntry> {
        self.engine
            .dialer()
            .queue_snapshot(&CAMPAIGN.into())
            .await
            .expect("campaign exists")
    }

    pub async fn count_with_status(&self, status: QueueEntryStatus) -> usize {
        self.queue().await.iter().filter(|e| e.status == status).count()
    }
}

pub fn phone(i: usize) -> String {
    format!("+1555010{:04}", i)
}

/// Poll `check` until it holds or a second passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
