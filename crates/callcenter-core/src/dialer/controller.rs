//! # Campaign Controller
//!
//! Admission control for one campaign. [`CampaignController::tick`] is one pass of the
//! control loop:
//!
//! 1. force-release contact locks older than the staleness window whose dial has no
//!    live call behind it
//! 2. count available agents assigned to this campaign; with none, release every dial
//!    that has not connected yet and stop
//! 3. with nothing queued, stop
//! 4. otherwise ask the pacing policy how many dials to place and place them
//!    concurrently. Agents the registry holds on a live call are not idle and do not
//!    earn dials
//!
//! Every dial is guarded by the contact store's lock. The controller also reconciles its
//! queue against call lifecycle events: a connected dial gets an agent, an ended dial
//! closes its queue entry, releases the lock, records the outcome and, when the contact
//! can be tried again, queues a fresh entry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agent::AgentDirectory;
use crate::call::{CallDirection, CallLifecycleEvent, CallRegistry, CallSession, CallStatus, EndReason, NewCall};
use crate::config::DialerConfig;
use crate::contacts::{AttemptOutcome, AttemptRecord, Contact, ContactStore};
use crate::error::{CallCenterError, Result};
use crate::ids::{AgentId, CallId, CampaignId, ContactId, QueueEntryId};
use crate::notify::NotificationHub;
use crate::provider::ProviderInstruction;

use super::campaign::{Campaign, CampaignStatus};
use super::pacing::{PacingInput, PacingPolicy};
use super::queue::{DialQueue, DialQueueEntry, QueueEntryStatus, QueueStats};

/// Queued entries re-checked for eligibility per tick
const ELIGIBILITY_CHECKS_PER_TICK: usize = 32;

/// What a tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickDecision {
    /// Campaign is not active
    Inactive,
    StopNoAgents,
    StopEmptyQueue,
    Dial,
}

/// Result of one control-loop pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub decision: TickDecision,
    pub available_agents: usize,
    pub idle_agents: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub planned: usize,
    pub placed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub released: usize,
    pub recovered_locks: usize,
}

impl TickReport {
    fn new(decision: TickDecision) -> Self {
        Self {
            decision,
            available_agents: 0,
            idle_agents: 0,
            queued: 0,
            in_flight: 0,
            planned: 0,
            placed: 0,
            skipped: 0,
            failed: 0,
            released: 0,
            recovered_locks: 0,
        }
    }
}

enum DialResult {
    Placed,
    Skipped,
    Failed,
}

#[derive(Default)]
struct ControllerCounters {
    ticks: AtomicU64,
    dials_placed: AtomicU64,
    dial_failures: AtomicU64,
    lock_contention: AtomicU64,
    released: AtomicU64,
    stale_locks_recovered: AtomicU64,
    abandoned: AtomicU64,
    requeued: AtomicU64,
}

/// Per-campaign counters and queue depth
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
    pub pacing: String,
    pub queue: QueueStats,
    pub ticks: u64,
    pub dials_placed: u64,
    pub dial_failures: u64,
    pub lock_contention: u64,
    pub released: u64,
    pub stale_locks_recovered: u64,
    pub abandoned: u64,
    pub requeued: u64,
}

/// Admission controller and queue owner for one campaign
pub struct CampaignController {
    campaign_id: CampaignId,
    campaign: RwLock<Campaign>,
    queue: Mutex<DialQueue>,
    policy: RwLock<Arc<dyn PacingPolicy>>,
    contacts: Arc<dyn ContactStore>,
    agents: Arc<dyn AgentDirectory>,
    registry: CallRegistry,
    notifier: NotificationHub,
    config: DialerConfig,
    /// Lock owner written into contact locks
    owner: String,
    counters: ControllerCounters,
}

impl CampaignController {
    pub fn new(
        campaign: Campaign,
        contacts: Arc<dyn ContactStore>,
        agents: Arc<dyn AgentDirectory>,
        registry: CallRegistry,
        notifier: NotificationHub,
        config: DialerConfig,
        owner: impl Into<String>,
    ) -> Self {
        let policy: Arc<dyn PacingPolicy> = Arc::new(campaign.pacing);
        Self {
            campaign_id: campaign.id.clone(),
            queue: Mutex::new(DialQueue::with_history_limit(
                campaign.id.clone(),
                config.queue_history_limit,
            )),
            campaign: RwLock::new(campaign),
            policy: RwLock::new(policy),
            contacts,
            agents,
            registry,
            notifier,
            config,
            owner: owner.into(),
            counters: ControllerCounters::default(),
        }
    }

    pub fn campaign_id(&self) -> &CampaignId {
        &self.campaign_id
    }

    pub async fn campaign(&self) -> Campaign {
        self.campaign.read().await.clone()
    }

    pub async fn status(&self) -> CampaignStatus {
        self.campaign.read().await.status
    }

    pub async fn set_status(&self, status: CampaignStatus) {
        let mut campaign = self.campaign.write().await;
        if campaign.status != status {
            info!("📣 Campaign {} {} -> {}", self.campaign_id, campaign.status, status);
            campaign.status = status;
        }
    }

    /// Replace the pacing policy, e.g. with an adaptive one
    pub async fn set_policy(&self, policy: Arc<dyn PacingPolicy>) {
        info!("🎚️ Campaign {} pacing set to {}", self.campaign_id, policy.name());
        *self.policy.write().await = policy;
    }

    pub async fn enqueue(&self, contact: ContactId, priority: u8, notes: Option<String>) -> QueueEntryId {
        self.queue.lock().await.enqueue(contact, priority, notes)
    }

    pub async fn queue_snapshot(&self) -> Vec<DialQueueEntry> {
        self.queue.lock().await.snapshot()
    }

    pub async fn queue_entry(&self, entry: &QueueEntryId) -> Option<DialQueueEntry> {
        self.queue.lock().await.get(entry).cloned()
    }

    /// One pass of the admission-control loop
    pub async fn tick(&self) -> Result<TickReport> {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        let campaign = self.campaign().await;
        if campaign.status != CampaignStatus::Active {
            return Ok(TickReport::new(TickDecision::Inactive));
        }

        let recovered_locks = self.recover_stale_locks().await;

        let available = self.agents.count_available(&self.campaign_id).await?;
        if available == 0 {
            let released = self.release_unconnected(EndReason::NoAgentsAvailable).await;
            if released > 0 {
                info!("⏸️ Campaign {} has no available agents, released {} dials", self.campaign_id, released);
            }
            return Ok(TickReport {
                released,
                recovered_locks,
                ..TickReport::new(TickDecision::StopNoAgents)
            });
        }

        self.prune_ineligible().await;

        let on_calls = self.registry.agents_on_calls();
        let idle = self
            .agents
            .list_available(&self.campaign_id)
            .await?
            .into_iter()
            .filter(|agent| !on_calls.contains(agent))
            .count();

        let (queued, in_flight, dialing) = {
            let queue = self.queue.lock().await;
            let dialing = queue.dialing_entries();
            let in_flight = dialing
                .iter()
                .filter(|e| !self.is_connected(e.call_id.as_ref()))
                .count();
            (queue.queued_in_order(), in_flight, dialing.len())
        };

        let mut report = TickReport {
            available_agents: available,
            idle_agents: idle,
            queued: queued.len(),
            in_flight,
            recovered_locks,
            ..TickReport::new(TickDecision::StopEmptyQueue)
        };
        if queued.is_empty() {
            return Ok(report);
        }
        report.decision = TickDecision::Dial;

        let dialable = self.contacts.find_dialable(&self.campaign_id, queued.len()).await?;
        let mut by_contact: HashMap<ContactId, Contact> =
            dialable.into_iter().map(|c| (c.id.clone(), c)).collect();
        let candidates: Vec<(DialQueueEntry, Contact)> = queued
            .into_iter()
            .filter_map(|entry| by_contact.remove(&entry.contact_id).map(|contact| (entry, contact)))
            .collect();

        let input = PacingInput {
            available_agents: available,
            idle_agents: idle,
            candidates: candidates.len(),
            in_flight,
            dialing,
            max_calls_per_agent: campaign
                .max_calls_per_agent
                .unwrap_or(self.config.default_max_calls_per_agent),
            power_ceiling: campaign
                .power_dial_ceiling
                .unwrap_or(self.config.power_dial_ceiling),
        };
        let policy = self.policy.read().await.clone();
        let planned = policy.dials_for_tick(&input);
        report.planned = planned;
        if planned == 0 {
            return Ok(report);
        }

        debug!(
            "📊 Campaign {} tick: {} agents ({} idle), {} candidates, {} in flight, {} dials ({})",
            self.campaign_id,
            available,
            idle,
            candidates.len(),
            in_flight,
            planned,
            policy.name()
        );

        let caller_id = campaign.caller_id.clone();
        let results: Vec<DialResult> = stream::iter(candidates.into_iter().take(planned))
            .map(|(entry, contact)| self.dial_entry(entry, contact, caller_id.as_deref()))
            .buffer_unordered(planned)
            .collect()
            .await;

        for result in results {
            match result {
                DialResult::Placed => report.placed += 1,
                DialResult::Skipped => report.skipped += 1,
                DialResult::Failed => report.failed += 1,
            }
        }
        Ok(report)
    }

    fn is_connected(&self, call_id: Option<&CallId>) -> bool {
        call_id
            .and_then(|id| self.registry.get(id))
            .map(|s| s.status == CallStatus::InProgress)
            .unwrap_or(false)
    }

    /// Lock the contact, mark the entry dialing, count the attempt and place the call
    async fn dial_entry(&self, entry: DialQueueEntry, contact: Contact, caller_id: Option<&str>) -> DialResult {
        match self.contacts.try_lock(&contact.id, &self.owner).await {
            Ok(true) => {}
            Ok(false) => {
                self.counters.lock_contention.fetch_add(1, Ordering::Relaxed);
                debug!("🔒 Contact {} is locked elsewhere, skipping", contact.id);
                return DialResult::Skipped;
            }
            Err(e) => {
                warn!("⚠️ Locking contact {} failed: {}", contact.id, e);
                return DialResult::Skipped;
            }
        }

        if let Err(e) = self.queue.lock().await.mark_dialing(&entry.id) {
            debug!("Entry {} not dialable: {}", entry.id, e);
            self.unlock(&contact.id).await;
            return DialResult::Skipped;
        }

        let call = NewCall::outbound(contact.phone_number.clone())
            .with_contact(contact.id.clone())
            .with_campaign(self.campaign_id.clone());
        let session = match self.registry.create(call).await {
            Ok(session) => session,
            Err(e) => {
                warn!("❌ Could not create call for contact {}: {}", contact.id, e);
                self.queue.lock().await.revert_to_queued(&entry.id, "call_create_failed");
                self.unlock(&contact.id).await;
                self.counters.dial_failures.fetch_add(1, Ordering::Relaxed);
                return DialResult::Failed;
            }
        };

        if let Err(e) = self.queue.lock().await.link_call(&entry.id, session.id.clone()) {
            warn!("⚠️ Linking call {} to entry {} failed: {}", session.id, entry.id, e);
        }
        let attempt = AttemptRecord {
            call_id: session.id.clone(),
            at: Utc::now(),
        };
        if let Err(e) = self.contacts.record_attempt(&contact.id, attempt).await {
            warn!("⚠️ Recording attempt on contact {} failed: {}", contact.id, e);
        }

        match self.registry.place_call(&session.id, caller_id).await {
            Ok(_) => {
                self.counters.dials_placed.fetch_add(1, Ordering::Relaxed);
                debug!("📤 Dialing contact {} as call {}", contact.id, session.id);
                DialResult::Placed
            }
            Err(e) => {
                self.counters.dial_failures.fetch_add(1, Ordering::Relaxed);
                warn!("❌ Dial to contact {} failed: {}", contact.id, e);
                // place_call has already ended the session
                if let Some(ended) = self.registry.get(&session.id) {
                    self.finish_attempt(&ended).await;
                }
                DialResult::Failed
            }
        }
    }

    async fn unlock(&self, contact: &ContactId) {
        if let Err(e) = self.contacts.unlock(contact, &self.owner).await {
            warn!("⚠️ Releasing lock on contact {} failed: {}", contact, e);
        }
    }

    /// React to a registry event for one of this campaign's calls
    pub async fn on_call_event(&self, event: &CallLifecycleEvent) {
        match event {
            CallLifecycleEvent::StatusChanged { session, .. }
                if session.status == CallStatus::InProgress && session.direction == CallDirection::Outbound =>
            {
                self.on_connected(session).await;
            }
            CallLifecycleEvent::Ended(session) => {
                self.finish_attempt(session).await;
            }
            _ => {}
        }
    }

    /// Put an agent on a dial that just connected, or abandon it if nobody is free
    async fn on_connected(&self, session: &CallSession) {
        if session.agent_id.is_some() {
            return;
        }
        let (entry_id, taken) = {
            let queue = self.queue.lock().await;
            let Some(entry) = queue.entry_for_call(&session.id) else {
                return;
            };
            let mut taken: HashSet<AgentId> = queue
                .dialing_entries()
                .into_iter()
                .filter_map(|e| e.assigned_agent_id)
                .collect();
            taken.extend(self.registry.agents_on_calls());
            (entry.id.clone(), taken)
        };

        let agent = match self.agents.list_available(&self.campaign_id).await {
            Ok(agents) => agents.into_iter().find(|a| !taken.contains(a)),
            Err(e) => {
                warn!("⚠️ Agent lookup for connected call {} failed: {}", session.id, e);
                None
            }
        };

        let Some(agent) = agent else {
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            warn!("📵 Call {} connected with no agent free, abandoning", session.id);
            if let Err(e) = self.registry.end(&session.id, EndReason::Abandoned).await {
                debug!("Call {} already gone: {}", session.id, e);
            }
            return;
        };

        if let Err(e) = self.queue.lock().await.assign_agent(&entry_id, agent.clone()) {
            debug!("Entry {} closed before agent assignment: {}", entry_id, e);
        }
        let connected = match self.registry.assign_agent(&session.id, &agent).await {
            Ok(connected) => connected,
            Err(e) => {
                debug!("Call {} ended before agent {} joined: {}", session.id, agent, e);
                return;
            }
        };

        let endpoint = match self.agents.get(&agent).await {
            Ok(Some(a)) => a.endpoint,
            _ => agent.to_string(),
        };
        if let Some(pid) = &connected.provider_call_id {
            let connect = ProviderInstruction::ConnectAgent { endpoint };
            if let Err(e) = self.registry.adapter().update_call(pid, &connect).await {
                warn!("❌ Bridging call {} to agent {} failed: {}", session.id, agent, e);
                if matches!(e, CallCenterError::AdapterUnavailable(_)) {
                    let _ = self.registry.end(&session.id, EndReason::AdapterUnreachable).await;
                }
                return;
            }
        }
        info!("🤝 Agent {} connected to call {} ({})", agent, session.id, session.phone_number);
        self.notifier.notify_answered(&connected, &agent);
    }

    /// Close the queue entry of an ended dial
    ///
    /// Only the first caller for a given call does anything; later calls return `None`.
    pub async fn finish_attempt(&self, session: &CallSession) -> Option<DialQueueEntry> {
        if !session.status.is_terminal() {
            return None;
        }
        let outcome = AttemptOutcome::from_session(session);
        let status = if outcome.reached() {
            QueueEntryStatus::Completed
        } else {
            QueueEntryStatus::Failed
        };

        let finished = {
            let mut queue = self.queue.lock().await;
            let entry_id = queue.entry_for_call(&session.id)?.id.clone();
            queue.finish(&entry_id, Some(&session.id), status, outcome.as_str())?
        };

        self.unlock(&finished.contact_id).await;
        let agent = session.agent_id.as_ref().or(finished.assigned_agent_id.as_ref());
        if let Err(e) = self.contacts.record_outcome(&finished.contact_id, outcome, agent).await {
            warn!("⚠️ Recording outcome for contact {} failed: {}", finished.contact_id, e);
        }
        info!("🏁 Queue entry {} {} ({})", finished.id, finished.status, outcome);

        if self.config.requeue_failed_attempts && outcome.retryable() {
            match self.contacts.is_retry_eligible(&finished.contact_id).await {
                Ok(true) => {
                    let retry = self.queue.lock().await.enqueue(
                        finished.contact_id.clone(),
                        finished.priority,
                        Some(format!("retry after {}", outcome)),
                    );
                    self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                    debug!("🔁 Contact {} requeued as {}", finished.contact_id, retry);
                }
                Ok(false) => {}
                Err(e) => warn!("⚠️ Retry check for contact {} failed: {}", finished.contact_id, e),
            }
        }
        Some(finished)
    }

    /// Revert every dialing entry whose call has not connected, end those calls, and
    /// release their contact locks. Returns how many were released.
    pub async fn release_unconnected(&self, reason: EndReason) -> usize {
        let released: Vec<DialQueueEntry> = {
            let mut queue = self.queue.lock().await;
            let targets: Vec<DialQueueEntry> = queue
                .dialing_entries()
                .into_iter()
                .filter(|e| !self.is_connected(e.call_id.as_ref()))
                .collect();
            targets
                .into_iter()
                .filter_map(|e| {
                    let call_id = e.call_id.clone();
                    queue.revert_to_queued(&e.id, reason.as_str()).map(|mut reverted| {
                        reverted.call_id = call_id;
                        reverted
                    })
                })
                .collect()
        };

        for entry in &released {
            if let Some(call_id) = &entry.call_id {
                if let Err(e) = self.registry.end(call_id, reason.clone()).await {
                    debug!("Call {} already gone while releasing: {}", call_id, e);
                }
            }
            self.unlock(&entry.contact_id).await;
        }
        self.counters.released.fetch_add(released.len() as u64, Ordering::Relaxed);
        released.len()
    }

    /// Force-release this campaign's stale contact locks that have no live call
    async fn recover_stale_locks(&self) -> usize {
        let stale = match self
            .contacts
            .stale_locks(&self.campaign_id, self.config.lock_staleness())
            .await
        {
            Ok(stale) => stale,
            Err(e) => {
                warn!("⚠️ Stale lock scan for campaign {} failed: {}", self.campaign_id, e);
                return 0;
            }
        };

        let mut recovered = 0;
        for contact in stale {
            let entry = self
                .queue
                .lock()
                .await
                .dialing_entries()
                .into_iter()
                .find(|e| e.contact_id == contact.id);

            if let Some(entry) = &entry {
                if let Some(call_id) = &entry.call_id {
                    if self.registry.is_live(call_id) {
                        continue;
                    }
                    // ended while we missed the event
                    if let Some(ended) = self.registry.get(call_id) {
                        if self.finish_attempt(&ended).await.is_some() {
                            recovered += 1;
                            continue;
                        }
                    }
                }
            }

            let owner = contact.lock.as_ref().map(|l| l.owner.clone()).unwrap_or_default();
            warn!("🔓 Force-releasing stale lock on contact {} held by {}", contact.id, owner);
            if let Err(e) = self.contacts.force_unlock(&contact.id).await {
                warn!("⚠️ Force unlock of contact {} failed: {}", contact.id, e);
                continue;
            }
            if let Some(entry) = entry {
                self.queue.lock().await.revert_to_queued(&entry.id, "stale_lock");
            }
            recovered += 1;
        }
        self.counters
            .stale_locks_recovered
            .fetch_add(recovered as u64, Ordering::Relaxed);
        recovered
    }

    /// Fail queued entries whose contact can no longer be dialed
    async fn prune_ineligible(&self) {
        let head: Vec<DialQueueEntry> = self
            .queue
            .lock()
            .await
            .queued_in_order()
            .into_iter()
            .take(ELIGIBILITY_CHECKS_PER_TICK)
            .collect();

        for entry in head {
            let outcome = match self.contacts.is_retry_eligible(&entry.contact_id).await {
                Ok(true) => continue,
                Ok(false) => "not_dialable",
                Err(CallCenterError::NotFound(_)) => "contact_missing",
                Err(e) => {
                    warn!("⚠️ Eligibility check for contact {} failed: {}", entry.contact_id, e);
                    continue;
                }
            };
            if self.queue.lock().await.fail_queued(&entry.id, outcome).is_some() {
                debug!("🚫 Queue entry {} for contact {} dropped: {}", entry.id, entry.contact_id, outcome);
            }
        }
    }

    pub async fn stats(&self) -> CampaignStats {
        let campaign = self.campaign().await;
        let pacing = self.policy.read().await.name();
        let queue = self.queue.lock().await.stats();
        let c = &self.counters;
        CampaignStats {
            campaign_id: self.campaign_id.clone(),
            status: campaign.status,
            pacing,
            queue,
            ticks: c.ticks.load(Ordering::Relaxed),
            dials_placed: c.dials_placed.load(Ordering::Relaxed),
            dial_failures: c.dial_failures.load(Ordering::Relaxed),
            lock_contention: c.lock_contention.load(Ordering::Relaxed),
            released: c.released.load(Ordering::Relaxed),
            stale_locks_recovered: c.stale_locks_recovered.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            requeued: c.requeued.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::{Agent, InMemoryAgentDirectory};
    use crate::call::MemoryCallStore;
    use crate::config::ProviderConfig;
    use crate::contacts::{InMemoryContactStore, RetryPolicy};
    use crate::dialer::PacingStrategy;
    use crate::provider::{CallControlAdapter, SimulatedBehavior, SimulatedProvider};

    struct Fixture {
        controller: CampaignController,
        registry: CallRegistry,
        contacts: InMemoryContactStore,
        agents: InMemoryAgentDirectory,
        provider: Arc<SimulatedProvider>,
    }

    fn fixture(pacing: PacingStrategy, agents_online: usize, contacts_queued: usize) -> Fixture {
        let provider = Arc::new(SimulatedProvider::new());
        let provider_config = ProviderConfig {
            request_timeout_ms: 50,
            retry_backoff_ms: 5,
            ..ProviderConfig::default()
        };
        let adapter = Arc::new(CallControlAdapter::new(provider.clone(), &provider_config));
        let store = Arc::new(MemoryCallStore::new());
        let registry = CallRegistry::new(adapter, store.clone(), store, 256);

        let contacts = InMemoryContactStore::with_policy(RetryPolicy {
            max_attempts: 3,
            cooldown: Duration::from_secs(0),
        });
        let agents = InMemoryAgentDirectory::new();
        for i in 0..agents_online {
            let id = format!("agent-{}", i);
            agents.register_agent(Agent::new(id.as_str(), id.as_str()).with_campaign("camp")).unwrap();
            agents.login(&id.as_str().into()).unwrap();
        }

        let mut campaign = Campaign::new("camp", "Test campaign", pacing);
        campaign.status = CampaignStatus::Active;
        let controller = CampaignController::new(
            campaign,
            Arc::new(contacts.clone()),
            Arc::new(agents.clone()),
            registry.clone(),
            NotificationHub::new(16),
            DialerConfig::default(),
            "worker-test",
        );

        Fixture {
            controller,
            registry,
            contacts,
            agents,
            provider,
        }
        .with_contacts(contacts_queued)
    }

    impl Fixture {
        fn with_contacts(self, count: usize) -> Self {
            for i in 0..count {
                self.contacts
                    .insert(Contact::new(format!("c{}", i), "camp", format!("+1555000{:04}", i)));
            }
            self
        }

        async fn enqueue_all(&self, count: usize) {
            for i in 0..count {
                self.controller.enqueue(format!("c{}", i).into(), 5, None).await;
            }
        }
    }

    #[tokio::test]
    async fn test_progressive_dials_one_per_agent() {
        let f = fixture(PacingStrategy::Progressive, 3, 10);
        f.enqueue_all(10).await;

        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.decision, TickDecision::Dial);
        assert_eq!(report.placed, 3);
        assert_eq!(f.provider.placed_calls().len(), 3);

        let stats = f.controller.stats().await;
        assert_eq!(stats.queue.dialing, 3);
        assert_eq!(stats.queue.queued, 7);
    }

    #[tokio::test]
    async fn test_no_agents_releases_unconnected_dials() {
        let f = fixture(PacingStrategy::Progressive, 2, 5);
        f.enqueue_all(5).await;
        f.controller.tick().await.unwrap();
        assert_eq!(f.controller.stats().await.queue.dialing, 2);

        for i in 0..2 {
            f.agents.logout(&format!("agent-{}", i).as_str().into()).unwrap();
        }
        let report = f.controller.tick().await.unwrap();

        assert_eq!(report.decision, TickDecision::StopNoAgents);
        assert_eq!(report.released, 2);
        let stats = f.controller.stats().await;
        assert_eq!(stats.queue.dialing, 0);
        assert_eq!(stats.queue.queued, 5);
        assert!(f.contacts.find_dialable(&"camp".into(), 10).await.unwrap().len() == 5);
        assert_eq!(f.registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_inactive_campaign_does_nothing() {
        let f = fixture(PacingStrategy::Power, 3, 3);
        f.enqueue_all(3).await;
        f.controller.set_status(CampaignStatus::Paused).await;

        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.decision, TickDecision::Inactive);
        assert!(f.provider.placed_calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_dial_fails_entry_without_retry() {
        let f = fixture(PacingStrategy::Progressive, 1, 1);
        f.provider
            .set_default_behavior(SimulatedBehavior::Reject("invalid number".into()));
        f.enqueue_all(1).await;

        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.failed, 1);

        let snapshot = f.controller.queue_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, QueueEntryStatus::Failed);
        assert_eq!(snapshot[0].outcome.as_deref(), Some("provider_rejected"));

        let contact = f.contacts.get(&"c0".into()).await.unwrap().unwrap();
        assert!(!contact.is_locked());
        assert_eq!(contact.attempts, 1);
        assert!(!contact.dialable);
    }

    #[tokio::test]
    async fn test_finished_busy_attempt_is_requeued() {
        let f = fixture(PacingStrategy::Progressive, 1, 1);
        f.enqueue_all(1).await;
        f.controller.tick().await.unwrap();

        let entry = f.controller.queue_snapshot().await.remove(0);
        let call_id = entry.call_id.clone().unwrap();
        let ended = f.registry.apply_provider_status(&call_id, "busy").await.unwrap();

        let finished = f.controller.finish_attempt(&ended).await.unwrap();
        assert_eq!(finished.status, QueueEntryStatus::Failed);
        assert!(f.controller.finish_attempt(&ended).await.is_none());

        let snapshot = f.controller.queue_snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].status, QueueEntryStatus::Queued);
        assert_eq!(snapshot[0].contact_id, ContactId::from("c0"));
    }

    #[tokio::test]
    async fn test_connected_dial_gets_an_agent() {
        let f = fixture(PacingStrategy::Progressive, 1, 1);
        f.enqueue_all(1).await;
        f.controller.tick().await.unwrap();

        let call_id = f.controller.queue_snapshot().await[0].call_id.clone().unwrap();
        let connected = f.registry.apply_provider_status(&call_id, "in-progress").await.unwrap();
        f.controller
            .on_call_event(&CallLifecycleEvent::StatusChanged {
                session: connected,
                previous: CallStatus::Initiated,
            })
            .await;

        let session = f.registry.get(&call_id).unwrap();
        assert_eq!(session.agent_id, Some(AgentId::from("agent-0")));
        assert!(f
            .provider
            .updates()
            .iter()
            .any(|(_, i)| matches!(i, ProviderInstruction::ConnectAgent { .. })));
    }

    #[tokio::test]
    async fn test_agent_on_call_earns_no_new_dial() {
        let f = fixture(PacingStrategy::Progressive, 1, 2);
        f.enqueue_all(2).await;
        assert_eq!(f.controller.tick().await.unwrap().placed, 1);

        let call_id = f.controller.queue_snapshot().await[0].call_id.clone().unwrap();
        let connected = f.registry.apply_provider_status(&call_id, "in-progress").await.unwrap();
        f.controller
            .on_call_event(&CallLifecycleEvent::StatusChanged {
                session: connected,
                previous: CallStatus::Initiated,
            })
            .await;
        assert_eq!(f.registry.get(&call_id).unwrap().agent_id, Some(AgentId::from("agent-0")));

        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.available_agents, 1);
        assert_eq!(report.idle_agents, 0);
        assert_eq!(report.placed, 0);
        assert_eq!(f.provider.placed_calls().len(), 1);
        assert_eq!(f.controller.stats().await.queue.queued, 1);
    }

    #[tokio::test]
    async fn test_connected_dial_skips_agent_on_inbound_call() {
        let f = fixture(PacingStrategy::Progressive, 2, 1);
        let inbound = NewCall::inbound("PA-IN".into(), "+15557770000");
        let (ringing, _) = f.registry.create_inbound(inbound).unwrap();
        f.registry.claim(&ringing.id, &"agent-0".into()).await.unwrap();

        f.enqueue_all(1).await;
        assert_eq!(f.controller.tick().await.unwrap().idle_agents, 1);
        let call_id = f.controller.queue_snapshot().await[0].call_id.clone().unwrap();
        let connected = f.registry.apply_provider_status(&call_id, "in-progress").await.unwrap();
        f.controller
            .on_call_event(&CallLifecycleEvent::StatusChanged {
                session: connected,
                previous: CallStatus::Initiated,
            })
            .await;

        assert_eq!(f.registry.get(&call_id).unwrap().agent_id, Some(AgentId::from("agent-1")));
    }

    #[tokio::test]
    async fn test_connected_dial_without_agent_is_abandoned() {
        let f = fixture(PacingStrategy::Progressive, 1, 1);
        f.enqueue_all(1).await;
        f.controller.tick().await.unwrap();
        f.agents
            .update_agent_status(&"agent-0".into(), crate::agent::AgentStatus::Busy)
            .unwrap();

        let call_id = f.controller.queue_snapshot().await[0].call_id.clone().unwrap();
        let connected = f.registry.apply_provider_status(&call_id, "in-progress").await.unwrap();
        f.controller
            .on_call_event(&CallLifecycleEvent::StatusChanged {
                session: connected,
                previous: CallStatus::Ringing,
            })
            .await;

        let session = f.registry.get(&call_id).unwrap();
        assert_eq!(session.end_reason, Some(EndReason::Abandoned));
        assert_eq!(f.controller.stats().await.abandoned, 1);
    }

    #[tokio::test]
    async fn test_stale_lock_without_call_is_released() {
        let f = fixture(PacingStrategy::Progressive, 1, 1);
        // a crashed worker left this lock behind
        assert!(f.contacts.try_lock(&"c0".into(), "dead-worker").await.unwrap());

        let mut config = DialerConfig::default();
        config.lock_staleness_secs = 0;
        let controller = CampaignController::new(
            f.controller.campaign().await,
            Arc::new(f.contacts.clone()),
            Arc::new(f.agents.clone()),
            f.registry.clone(),
            NotificationHub::new(4),
            config,
            "worker-test",
        );
        controller.enqueue("c0".into(), 5, None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = controller.tick().await.unwrap();
        assert_eq!(report.recovered_locks, 1);
        assert_eq!(report.placed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_contact_is_dropped_from_queue() {
        let f = fixture(PacingStrategy::Progressive, 1, 0);
        f.contacts.insert(Contact::new("done", "camp", "+15550009999").with_max_attempts(0));
        let entry = f.controller.enqueue("done".into(), 5, None).await;

        let report = f.controller.tick().await.unwrap();
        assert_eq!(report.decision, TickDecision::StopEmptyQueue);
        let entry = f.controller.queue_entry(&entry).await.unwrap();
        assert_eq!(entry.status, QueueEntryStatus::Failed);
        assert_eq!(entry.outcome.as_deref(), Some("not_dialable"));
    }
}
