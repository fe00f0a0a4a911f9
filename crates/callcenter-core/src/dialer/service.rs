//! # Dialer Service
//!
//! Owns every campaign controller and runs one independent control loop per active
//! campaign. Loops share nothing but the contact store's lock and the provider; a slow
//! tick in one campaign never delays another.
//!
//! A loop ticks on the configured interval and additionally whenever agent presence
//! changes, so a newly available agent is put to work without waiting out the interval.
//! Stopping or pausing a campaign cancels its loop before its next tick and releases
//! every dial that has not connected yet.
//!
//! Call lifecycle events are dispatched to per-campaign workers, preserving event order
//! within a campaign while keeping campaigns independent.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::agent::AgentDirectory;
use crate::call::{CallLifecycleEvent, CallRegistry, EndReason};
use crate::config::DialerConfig;
use crate::contacts::ContactStore;
use crate::error::{CallCenterError, Result};
use crate::ids::{CampaignId, ContactId, QueueEntryId};
use crate::notify::NotificationHub;

use super::campaign::{Campaign, CampaignStatus, PacingStrategy};
use super::controller::{CampaignController, CampaignStats, TickReport};
use super::pacing::PacingPolicy;
use super::queue::DialQueueEntry;

struct CampaignLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Campaign lifecycle and the per-campaign admission loops
///
/// # Examples
///
/// ```no_run
/// use callcenter_core::prelude::*;
///
/// # async fn example(engine: std::sync::Arc<CallCenterEngine>) -> Result<()> {
/// let dialer = engine.dialer();
/// dialer
///     .add_campaign(Campaign::new("spring-renewals", "Spring renewals", PacingStrategy::Progressive))
///     .await?;
/// dialer.enqueue(&"spring-renewals".into(), "contact-1".into(), 5, None).await?;
/// dialer.start_campaign(&"spring-renewals".into()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DialerService {
    controllers: Arc<DashMap<CampaignId, Arc<CampaignController>>>,
    loops: Arc<DashMap<CampaignId, CampaignLoop>>,
    contacts: Arc<dyn ContactStore>,
    agents: Arc<dyn AgentDirectory>,
    registry: CallRegistry,
    notifier: NotificationHub,
    config: DialerConfig,
    owner: String,
}

impl DialerService {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        agents: Arc<dyn AgentDirectory>,
        registry: CallRegistry,
        notifier: NotificationHub,
        config: DialerConfig,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            controllers: Arc::new(DashMap::new()),
            loops: Arc::new(DashMap::new()),
            contacts,
            agents,
            registry,
            notifier,
            config,
            owner: owner.into(),
        }
    }

    /// Register a campaign. It starts paused unless its status is already `Active`.
    pub async fn add_campaign(&self, campaign: Campaign) -> Result<()> {
        if campaign.id.as_str().trim().is_empty() {
            return Err(CallCenterError::validation("campaign id cannot be empty"));
        }
        if let PacingStrategy::Predictive { dial_ratio } = campaign.pacing {
            if !(dial_ratio.is_finite() && dial_ratio > 0.0) {
                return Err(CallCenterError::validation(format!(
                    "campaign {} dial ratio must be positive, got {}",
                    campaign.id, dial_ratio
                )));
            }
        }
        if self.controllers.contains_key(&campaign.id) {
            return Err(CallCenterError::validation(format!("campaign {} already exists", campaign.id)));
        }

        let id = campaign.id.clone();
        let start = campaign.status == CampaignStatus::Active;
        info!("📋 Added campaign {} ({}, {})", id, campaign.name, campaign.pacing);
        let controller = Arc::new(CampaignController::new(
            campaign,
            self.contacts.clone(),
            self.agents.clone(),
            self.registry.clone(),
            self.notifier.clone(),
            self.config.clone(),
            self.owner.clone(),
        ));
        self.controllers.insert(id.clone(), controller);

        if start {
            self.start_campaign(&id).await?;
        }
        Ok(())
    }

    pub fn controller(&self, campaign: &CampaignId) -> Result<Arc<CampaignController>> {
        self.controllers
            .get(campaign)
            .map(|c| c.value().clone())
            .ok_or_else(|| CallCenterError::not_found(format!("campaign {}", campaign)))
    }

    pub fn campaign_ids(&self) -> Vec<CampaignId> {
        let mut ids: Vec<CampaignId> = self.controllers.iter().map(|c| c.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Mark a campaign active and start its control loop
    pub async fn start_campaign(&self, campaign: &CampaignId) -> Result<()> {
        let controller = self.controller(campaign)?;
        controller.set_status(CampaignStatus::Active).await;

        if let Some(running) = self.loops.get(campaign) {
            if !running.handle.is_finished() {
                debug!("Campaign {} loop already running", campaign);
                return Ok(());
            }
        }
        let campaign_loop = self.spawn_loop(controller);
        self.loops.insert(campaign.clone(), campaign_loop);
        Ok(())
    }

    /// Start a campaign with a custom pacing policy in place of its configured strategy
    pub async fn start_campaign_with_policy(
        &self,
        campaign: &CampaignId,
        policy: Arc<dyn PacingPolicy>,
    ) -> Result<()> {
        self.controller(campaign)?.set_policy(policy).await;
        self.start_campaign(campaign).await
    }

    pub async fn pause_campaign(&self, campaign: &CampaignId) -> Result<usize> {
        self.halt(campaign, CampaignStatus::Paused).await
    }

    pub async fn stop_campaign(&self, campaign: &CampaignId) -> Result<usize> {
        self.halt(campaign, CampaignStatus::Stopped).await
    }

    /// Leave `Active`, cancel the loop, release unconnected dials. Returns how many
    /// dials were released.
    async fn halt(&self, campaign: &CampaignId, status: CampaignStatus) -> Result<usize> {
        let controller = self.controller(campaign)?;
        controller.set_status(status).await;
        self.cancel_loop(campaign).await;

        let released = controller.release_unconnected(EndReason::CampaignStopped).await;
        info!("⏹️ Campaign {} {}, released {} dials", campaign, status, released);
        Ok(released)
    }

    async fn cancel_loop(&self, campaign: &CampaignId) {
        if let Some((_, campaign_loop)) = self.loops.remove(campaign) {
            let _ = campaign_loop.shutdown.send(true);
            if let Err(e) = campaign_loop.handle.await {
                error!("❌ Campaign {} loop ended abnormally: {}", campaign, e);
            }
        }
    }

    pub async fn campaign_status(&self, campaign: &CampaignId) -> Result<CampaignStatus> {
        Ok(self.controller(campaign)?.status().await)
    }

    pub fn is_running(&self, campaign: &CampaignId) -> bool {
        self.loops
            .get(campaign)
            .map(|l| !l.handle.is_finished())
            .unwrap_or(false)
    }

    /// Add a contact to a campaign's dial queue
    pub async fn enqueue(
        &self,
        campaign: &CampaignId,
        contact: ContactId,
        priority: u8,
        notes: Option<String>,
    ) -> Result<QueueEntryId> {
        let controller = self.controller(campaign)?;
        match self.contacts.get(&contact).await? {
            Some(c) if &c.campaign_id == campaign => {}
            Some(c) => {
                return Err(CallCenterError::validation(format!(
                    "contact {} belongs to campaign {}, not {}",
                    contact, c.campaign_id, campaign
                )))
            }
            None => return Err(CallCenterError::not_found(format!("contact {}", contact))),
        }
        Ok(controller.enqueue(contact, priority, notes).await)
    }

    pub async fn queue_snapshot(&self, campaign: &CampaignId) -> Result<Vec<DialQueueEntry>> {
        Ok(self.controller(campaign)?.queue_snapshot().await)
    }

    /// Run one tick outside the loop schedule
    pub async fn tick_campaign(&self, campaign: &CampaignId) -> Result<TickReport> {
        self.controller(campaign)?.tick().await
    }

    fn spawn_loop(&self, controller: Arc<CampaignController>) -> CampaignLoop {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let tick_interval = self.config.tick_interval();
        let mut presence = self.agents.watch_changes();
        let span = info_span!("campaign", id = %controller.campaign_id());

        let handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(tick_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                info!("▶️ Campaign loop started ({:?} tick)", tick_interval);

                loop {
                    tokio::select! {
                        biased;
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = interval.tick() => run_tick(&controller).await,
                        changed = presence_changed(&mut presence) => {
                            if changed {
                                run_tick(&controller).await;
                            }
                        }
                    }
                }
                info!("⏹️ Campaign loop stopped");
            }
            .instrument(span),
        );

        CampaignLoop { shutdown, handle }
    }

    /// Route registry events to the owning campaign's controller
    ///
    /// Each campaign gets its own worker so a slow reconciliation in one campaign never
    /// holds up another.
    pub fn spawn_event_pump(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut events = self.registry.subscribe();
        let controllers = self.controllers.clone();

        tokio::spawn(async move {
            let mut workers: HashMap<CampaignId, mpsc::UnboundedSender<CallLifecycleEvent>> = HashMap::new();
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = events.recv() => match received {
                        Ok(event) => {
                            let Some(campaign) = event.session().campaign_id.clone() else {
                                continue;
                            };
                            let Some(controller) = controllers.get(&campaign).map(|c| c.value().clone()) else {
                                continue;
                            };
                            let worker = workers
                                .entry(campaign.clone())
                                .or_insert_with(|| spawn_event_worker(controller));
                            if worker.send(event).is_err() {
                                warn!("⚠️ Event worker for campaign {} is gone", campaign);
                                workers.remove(&campaign);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // stale-lock recovery closes whatever these events would have
                            warn!("⚠️ Dialer event pump lagged, {} call events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("Dialer event pump stopping");
        })
    }

    pub async fn stats(&self) -> Vec<CampaignStats> {
        let controllers: Vec<Arc<CampaignController>> =
            self.controllers.iter().map(|c| c.value().clone()).collect();
        let mut stats = Vec::with_capacity(controllers.len());
        for controller in controllers {
            stats.push(controller.stats().await);
        }
        stats.sort_by(|a, b| a.campaign_id.cmp(&b.campaign_id));
        stats
    }

    /// Cancel every loop without changing campaign status
    pub async fn shutdown(&self) {
        let ids: Vec<CampaignId> = self.loops.iter().map(|l| l.key().clone()).collect();
        for id in ids {
            self.cancel_loop(&id).await;
        }
    }
}

async fn run_tick(controller: &CampaignController) {
    match controller.tick().await {
        Ok(report) if report.placed > 0 || report.released > 0 => {
            info!(
                "📞 Tick: {} agents, {} queued, placed {}, released {}",
                report.available_agents, report.queued, report.placed, report.released
            );
        }
        Ok(report) => debug!("Tick: {:?}", report.decision),
        Err(e) => warn!("⚠️ Campaign tick failed: {}", e),
    }
}

/// Resolves when agent presence changes; never resolves without a presence feed
async fn presence_changed(presence: &mut Option<watch::Receiver<u64>>) -> bool {
    match presence {
        Some(rx) => {
            if rx.changed().await.is_ok() {
                true
            } else {
                *presence = None;
                false
            }
        }
        None => std::future::pending().await,
    }
}

fn spawn_event_worker(controller: Arc<CampaignController>) -> mpsc::UnboundedSender<CallLifecycleEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<CallLifecycleEvent>();
    let span = info_span!("campaign_events", id = %controller.campaign_id());
    tokio::spawn(
        async move {
            while let Some(event) = rx.recv().await {
                controller.on_call_event(&event).await;
            }
        }
        .instrument(span),
    );
    tx
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::{Agent, InMemoryAgentDirectory};
    use crate::call::MemoryCallStore;
    use crate::config::ProviderConfig;
    use crate::contacts::{Contact, InMemoryContactStore};
    use crate::dialer::QueueEntryStatus;
    use crate::provider::{CallControlAdapter, SimulatedProvider};

    fn service(agents: &InMemoryAgentDirectory, contacts: &InMemoryContactStore) -> (DialerService, CallRegistry) {
        let provider = Arc::new(SimulatedProvider::new());
        let adapter = Arc::new(CallControlAdapter::new(provider, &ProviderConfig::default()));
        let store = Arc::new(MemoryCallStore::new());
        let registry = CallRegistry::new(adapter, store.clone(), store, 256);
        let config = DialerConfig {
            tick_interval_ms: 20,
            ..DialerConfig::default()
        };
        let dialer = DialerService::new(
            Arc::new(contacts.clone()),
            Arc::new(agents.clone()),
            registry.clone(),
            NotificationHub::new(16),
            config,
            "worker-test",
        );
        (dialer, registry)
    }

    #[tokio::test]
    async fn test_rejects_bad_dial_ratio_and_duplicates() {
        let (dialer, _) = service(&InMemoryAgentDirectory::new(), &InMemoryContactStore::new());
        let bad = Campaign::new("a", "A", PacingStrategy::Predictive { dial_ratio: 0.0 });
        assert!(dialer.add_campaign(bad).await.is_err());

        dialer
            .add_campaign(Campaign::new("b", "B", PacingStrategy::Progressive))
            .await
            .unwrap();
        assert!(dialer
            .add_campaign(Campaign::new("b", "B again", PacingStrategy::Power))
            .await
            .is_err());
        assert_eq!(dialer.campaign_status(&"b".into()).await.unwrap(), CampaignStatus::Paused);
    }

    #[tokio::test]
    async fn test_enqueue_checks_campaign_membership() {
        let contacts = InMemoryContactStore::new();
        contacts.insert(Contact::new("c1", "other", "+15550001111"));
        let (dialer, _) = service(&InMemoryAgentDirectory::new(), &contacts);
        dialer
            .add_campaign(Campaign::new("camp", "Camp", PacingStrategy::Progressive))
            .await
            .unwrap();

        assert!(dialer.enqueue(&"camp".into(), "c1".into(), 5, None).await.is_err());
        assert!(dialer.enqueue(&"camp".into(), "missing".into(), 5, None).await.is_err());
    }

    #[tokio::test]
    async fn test_loop_dials_and_stop_releases() {
        let agents = InMemoryAgentDirectory::new();
        agents.register_agent(Agent::new("alice", "Alice").with_campaign("camp")).unwrap();
        agents.login(&"alice".into()).unwrap();
        let contacts = InMemoryContactStore::new();
        contacts.insert(Contact::new("c1", "camp", "+15550001111"));
        contacts.insert(Contact::new("c2", "camp", "+15550002222"));

        let (dialer, registry) = service(&agents, &contacts);
        dialer
            .add_campaign(Campaign::new("camp", "Camp", PacingStrategy::Progressive))
            .await
            .unwrap();
        dialer.enqueue(&"camp".into(), "c1".into(), 5, None).await.unwrap();
        dialer.enqueue(&"camp".into(), "c2".into(), 5, None).await.unwrap();
        dialer.start_campaign(&"camp".into()).await.unwrap();
        assert!(dialer.is_running(&"camp".into()));

        let mut dialed = false;
        for _ in 0..50 {
            if registry.live_count() == 1 {
                dialed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dialed, "loop never dialed");

        let released = dialer.stop_campaign(&"camp".into()).await.unwrap();
        assert_eq!(released, 1);
        assert!(!dialer.is_running(&"camp".into()));
        assert_eq!(registry.live_count(), 0);

        let snapshot = dialer.queue_snapshot(&"camp".into()).await.unwrap();
        assert!(snapshot.iter().all(|e| e.status == QueueEntryStatus::Queued));
        assert!(!contacts.get(&"c1".into()).await.unwrap().unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_event_pump_closes_entries() {
        let agents = InMemoryAgentDirectory::new();
        agents.register_agent(Agent::new("alice", "Alice").with_campaign("camp")).unwrap();
        agents.login(&"alice".into()).unwrap();
        let contacts = InMemoryContactStore::new();
        contacts.insert(Contact::new("c1", "camp", "+15550001111"));

        let (dialer, registry) = service(&agents, &contacts);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = dialer.spawn_event_pump(shutdown_rx);

        let mut campaign = Campaign::new("camp", "Camp", PacingStrategy::Progressive);
        campaign.status = CampaignStatus::Active;
        dialer.add_campaign(campaign).await.unwrap();
        dialer.cancel_loop(&"camp".into()).await;
        dialer.enqueue(&"camp".into(), "c1".into(), 5, None).await.unwrap();
        dialer.tick_campaign(&"camp".into()).await.unwrap();

        let call_id = dialer.queue_snapshot(&"camp".into()).await.unwrap()[0]
            .call_id
            .clone()
            .unwrap();
        registry.apply_provider_status(&call_id, "in-progress").await.unwrap();
        registry.apply_provider_status(&call_id, "completed").await.unwrap();

        let mut closed = false;
        for _ in 0..50 {
            let snapshot = dialer.queue_snapshot(&"camp".into()).await.unwrap();
            if snapshot[0].status == QueueEntryStatus::Completed {
                assert_eq!(snapshot[0].assigned_agent_id.as_ref().map(|a| a.as_str()), Some("alice"));
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed, "entry never completed");
        pump.abort();
    }
}
