//! # Inbound Router
//!
//! Turns an inbound-call webhook into a signaling instruction inside the provider's
//! response window. Only the session creation and two bounded lookups (caller and
//! available agents) run on the response path; ringing notifications, persistence and
//! the ring-timeout escalation run in the background after the instruction is returned.
//!
//! ## Priority
//!
//! A caller whose number was dialed outbound within `callback_window_secs` is a
//! callback and gets `high` priority, or `urgent` once the contact has been attempted
//! `urgent_attempt_threshold` times. The agent who last spoke to the contact, when
//! available, is rung first.
//!
//! ## Answer claims
//!
//! [`InboundRouter::on_answer`] goes through the registry's atomic claim. The winner's
//! claim withdraws every other ringing notification; a losing claimant gets its own
//! withdraw if the winner's has not reached it yet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::AgentDirectory;
use crate::call::{CallRegistry, CallSession, EndReason, NewCall};
use crate::config::InboundConfig;
use crate::contacts::{Contact, ContactStore};
use crate::error::{CallCenterError, Result};
use crate::ids::{AgentId, CallId};
use crate::notify::NotificationHub;
use crate::provider::ProviderInstruction;

use super::types::{
    CallerIdentity, InboundOutcome, InboundRoutingDecision, InboundWebhook, RoutingInstruction,
    RoutingPriority, SuggestedAction,
};

pub const TIER_DIRECT: &str = "direct";
pub const TIER_OVERFLOW: &str = "overflow";

#[derive(Default)]
struct RouterCounters {
    webhooks: AtomicU64,
    duplicates: AtomicU64,
    rung: AtomicU64,
    parked: AtomicU64,
    escalated: AtomicU64,
    answered: AtomicU64,
    lost_claims: AtomicU64,
    lookup_timeouts: AtomicU64,
}

/// Routing counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    pub webhooks: u64,
    pub duplicates: u64,
    pub rung: u64,
    pub parked: u64,
    pub escalated: u64,
    pub answered: u64,
    pub lost_claims: u64,
    pub lookup_timeouts: u64,
}

struct CallerLookup {
    identity: CallerIdentity,
    priority: RoutingPriority,
    preferred_agent: Option<AgentId>,
}

impl CallerLookup {
    fn anonymous() -> Self {
        Self {
            identity: CallerIdentity::Anonymous,
            priority: RoutingPriority::Normal,
            preferred_agent: None,
        }
    }
}

/// Inbound call router
#[derive(Clone)]
pub struct InboundRouter {
    registry: CallRegistry,
    contacts: Arc<dyn ContactStore>,
    agents: Arc<dyn AgentDirectory>,
    notifier: NotificationHub,
    config: InboundConfig,
    counters: Arc<RouterCounters>,
}

impl InboundRouter {
    pub fn new(
        registry: CallRegistry,
        contacts: Arc<dyn ContactStore>,
        agents: Arc<dyn AgentDirectory>,
        notifier: NotificationHub,
        config: InboundConfig,
    ) -> Self {
        Self {
            registry,
            contacts,
            agents,
            notifier,
            config,
            counters: Arc::new(RouterCounters::default()),
        }
    }

    /// Handle an inbound-call webhook
    ///
    /// Returns the decision and the instruction to render as the webhook response. A
    /// redelivered webhook maps onto the session created the first time and does not
    /// ring anyone again.
    pub async fn on_inbound_webhook(&self, webhook: InboundWebhook) -> Result<InboundOutcome> {
        self.counters.webhooks.fetch_add(1, Ordering::Relaxed);
        let lookup_budget = self.config.response_budget() / 2;

        let caller = match tokio::time::timeout(lookup_budget, self.identify(&webhook.from)).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                warn!("⚠️ Caller lookup for {} failed, routing as anonymous: {}", webhook.from, e);
                CallerLookup::anonymous()
            }
            Err(_) => {
                self.counters.lookup_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("⏱️ Caller lookup for {} timed out, routing as anonymous", webhook.from);
                CallerLookup::anonymous()
            }
        };

        let candidates = match tokio::time::timeout(
            lookup_budget,
            self.rank_candidates(caller.preferred_agent.as_ref()),
        )
        .await
        {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!("⚠️ Agent lookup failed, parking caller {}: {}", webhook.from, e);
                Vec::new()
            }
            Err(_) => {
                self.counters.lookup_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("⏱️ Agent lookup timed out, parking caller {}", webhook.from);
                Vec::new()
            }
        };

        let decision = InboundRoutingDecision {
            action: if candidates.is_empty() {
                SuggestedAction::Queue
            } else {
                SuggestedAction::AnswerDirectly
            },
            candidates: candidates.iter().map(|(id, _)| id.clone()).collect(),
            priority: caller.priority,
            caller: caller.identity,
        };
        let tier = match decision.action {
            SuggestedAction::AnswerDirectly => TIER_DIRECT,
            SuggestedAction::Queue => TIER_OVERFLOW,
        };

        let mut call = NewCall::inbound(webhook.provider_call_id.clone(), webhook.from.clone())
            .with_metadata("to", webhook.to.clone())
            .with_metadata("routing_priority", decision.priority.to_string())
            .with_metadata("routing_tier", tier);
        if let Some(contact_id) = decision.caller.contact_id() {
            call = call.with_contact(contact_id.clone());
        }

        let (session, created) = self.registry.create_inbound(call)?;
        if !created {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            let instruction = if session.metadata.get("routing_tier").map(String::as_str) == Some(TIER_OVERFLOW) {
                self.park_instruction()
            } else {
                self.instruction_for(&decision, &candidates, &webhook.from)
            };
            return Ok(InboundOutcome {
                call_id: session.id,
                decision,
                instruction,
                created: false,
            });
        }

        let instruction = self.instruction_for(&decision, &candidates, &webhook.from);
        match decision.action {
            SuggestedAction::AnswerDirectly => {
                self.counters.rung.fetch_add(1, Ordering::Relaxed);
                self.spawn_ringing(session.clone(), decision.candidates.clone(), decision.priority);
            }
            SuggestedAction::Queue => {
                self.counters.parked.fetch_add(1, Ordering::Relaxed);
            }
        }

        info!(
            "📥 Inbound call {} from {}: {:?}, priority {}, {} candidates",
            session.id,
            webhook.from,
            decision.action,
            decision.priority,
            decision.candidates.len()
        );

        Ok(InboundOutcome {
            call_id: session.id,
            decision,
            instruction,
            created: true,
        })
    }

    async fn identify(&self, from: &str) -> Result<CallerLookup> {
        let Some(contact) = self.contacts.find_by_phone(from).await? else {
            return Ok(CallerLookup::anonymous());
        };

        let priority = self.callback_priority(&contact);
        let preferred_agent = if priority > RoutingPriority::Normal {
            contact.last_agent_id.clone()
        } else {
            None
        };

        Ok(CallerLookup {
            identity: CallerIdentity::Contact {
                contact_id: contact.id,
                display_name: contact.display_name,
            },
            priority,
            preferred_agent,
        })
    }

    fn callback_priority(&self, contact: &Contact) -> RoutingPriority {
        let recent = contact
            .last_attempt_at
            .and_then(|at| (Utc::now() - at).to_std().ok())
            .map(|age| age <= self.config.callback_window())
            .unwrap_or(false);

        if !recent {
            RoutingPriority::Normal
        } else if contact.attempts >= self.config.urgent_attempt_threshold {
            RoutingPriority::Urgent
        } else {
            RoutingPriority::High
        }
    }

    /// Idle agents with their endpoints, preferred agent first, then longest idle
    ///
    /// An agent the registry holds on a live call is skipped even while its presence
    /// still reads available.
    async fn rank_candidates(&self, preferred: Option<&AgentId>) -> Result<Vec<(AgentId, String)>> {
        let on_calls = self.registry.agents_on_calls();
        let mut ids: Vec<AgentId> = self
            .agents
            .list_available_any()
            .await?
            .into_iter()
            .filter(|id| !on_calls.contains(id))
            .collect();
        if let Some(preferred) = preferred {
            if let Some(pos) = ids.iter().position(|id| id == preferred) {
                let agent = ids.remove(pos);
                ids.insert(0, agent);
            }
        }

        let mut ranked = Vec::with_capacity(ids.len());
        for id in ids {
            let endpoint = match self.agents.get(&id).await? {
                Some(agent) => agent.endpoint,
                None => continue,
            };
            ranked.push((id, endpoint));
        }
        Ok(ranked)
    }

    fn instruction_for(
        &self,
        decision: &InboundRoutingDecision,
        candidates: &[(AgentId, String)],
        caller: &str,
    ) -> RoutingInstruction {
        match decision.action {
            SuggestedAction::AnswerDirectly => RoutingInstruction::Ring {
                endpoints: candidates.iter().map(|(_, endpoint)| endpoint.clone()).collect(),
                timeout_secs: self.config.ring_timeout_secs,
                caller_id: caller.to_string(),
                overflow_queue: self.config.overflow_queue.clone(),
                hold_music_url: self.config.hold_music_url.clone(),
            },
            SuggestedAction::Queue => self.park_instruction(),
        }
    }

    fn park_instruction(&self) -> RoutingInstruction {
        RoutingInstruction::Park {
            queue: self.config.overflow_queue.clone(),
            hold_music_url: self.config.hold_music_url.clone(),
        }
    }

    fn spawn_ringing(&self, session: CallSession, candidates: Vec<AgentId>, priority: RoutingPriority) {
        // ringing is published before the webhook response leaves
        self.notifier.ring(&session, &candidates, Some(priority));
        let router = self.clone();
        let ring_timeout = self.config.ring_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(ring_timeout).await;
            if let Err(e) = router.escalate_unclaimed(&session.id).await {
                warn!("⚠️ Overflow escalation for call {} failed: {}", session.id, e);
            }
        });
    }

    /// Move a still-unclaimed ringing call to the overflow queue
    ///
    /// The switch to the overflow tier is a single registry write; only the caller that
    /// makes it withdraws the ringing notifications and parks the caller. Returns `false`
    /// when the call was claimed, ended or already escalated.
    pub async fn escalate_unclaimed(&self, call_id: &CallId) -> Result<bool> {
        let Some(session) = self.registry.tag_unclaimed(call_id, "routing_tier", TIER_OVERFLOW) else {
            debug!("Call {} claimed, ended or already in overflow", call_id);
            return Ok(false);
        };

        self.notifier.withdraw(call_id, None);
        self.counters.escalated.fetch_add(1, Ordering::Relaxed);
        info!("⏫ Call {} unanswered after {}s, moving to {}", call_id, self.config.ring_timeout_secs, self.config.overflow_queue);

        if let Some(pid) = &session.provider_call_id {
            let park = ProviderInstruction::Park {
                queue: self.config.overflow_queue.clone(),
                hold_music_url: self.config.hold_music_url.clone(),
            };
            if let Err(e) = self.registry.adapter().update_call(pid, &park).await {
                if matches!(e, CallCenterError::AdapterUnavailable(_)) {
                    self.registry.end(call_id, EndReason::AdapterUnreachable).await?;
                }
                return Err(e);
            }
        }
        Ok(true)
    }

    /// An agent answers a ringing inbound call
    ///
    /// The first claim wins. The winner's desktop gets `answered` and the provider is
    /// told to bridge the caller to the winner's endpoint; everyone else still ringing
    /// gets `withdrawn`. A losing claim returns [`CallCenterError::AlreadyClaimed`].
    pub async fn on_answer(&self, call_id: &CallId, agent_id: &AgentId) -> Result<CallSession> {
        let (session, fresh) = match self.registry.claim(call_id, agent_id).await {
            Ok(claimed) => claimed,
            Err(e @ CallCenterError::AlreadyClaimed { .. }) => {
                self.counters.lost_claims.fetch_add(1, Ordering::Relaxed);
                if self.notifier.withdraw_agent(call_id, agent_id) {
                    debug!("Withdrew call {} from losing claimant {}", call_id, agent_id);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !fresh {
            return Ok(session);
        }

        self.counters.answered.fetch_add(1, Ordering::Relaxed);
        self.notifier.withdraw(call_id, Some(agent_id));
        self.notifier.notify_answered(&session, agent_id);

        let endpoint = match self.agents.get(agent_id).await {
            Ok(Some(agent)) => agent.endpoint,
            _ => agent_id.to_string(),
        };
        if let Some(pid) = &session.provider_call_id {
            let connect = ProviderInstruction::ConnectAgent { endpoint };
            if let Err(e) = self.registry.adapter().update_call(pid, &connect).await {
                warn!("❌ Could not bridge call {} to agent {}: {}", call_id, agent_id, e);
                if matches!(e, CallCenterError::AdapterUnavailable(_)) {
                    self.registry.end(call_id, EndReason::AdapterUnreachable).await?;
                }
                return Err(e);
            }
        }
        Ok(session)
    }

    /// Ring timeout this router escalates after
    pub fn ring_timeout(&self) -> Duration {
        self.config.ring_timeout()
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            webhooks: c.webhooks.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            rung: c.rung.load(Ordering::Relaxed),
            parked: c.parked.load(Ordering::Relaxed),
            escalated: c.escalated.load(Ordering::Relaxed),
            answered: c.answered.load(Ordering::Relaxed),
            lost_claims: c.lost_claims.load(Ordering::Relaxed),
            lookup_timeouts: c.lookup_timeouts.load(Ordering::Relaxed),
        }
    }
}
