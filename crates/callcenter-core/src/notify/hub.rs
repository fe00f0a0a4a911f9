//! # Notification Hub
//!
//! Topic-scoped broadcast channels. A topic's channel is created on first subscribe and
//! dropped once its last subscriber goes away; publishing to a topic nobody listens on
//! discards the message. Delivery is best-effort: a lagging subscriber loses the oldest
//! messages rather than slowing publishers down.
//!
//! The hub also remembers which agents are currently being rung for each call so that a
//! claim can withdraw exactly the notifications that are now stale, once each.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::call::CallSession;
use crate::ids::{AgentId, CallId};
use crate::inbound::RoutingPriority;

use super::types::{Notification, NotificationKind, Topic};

struct PendingRing {
    template: Notification,
    agents: HashSet<AgentId>,
}

/// Fan-out counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationStats {
    pub topics: usize,
    pub pending_calls: usize,
    pub published: u64,
    pub undelivered: u64,
}

/// Publish/subscribe hub for agent and campaign topics
///
/// Cheap to clone; clones share channels.
///
/// # Examples
///
/// ```
/// use callcenter_core::notify::{NotificationHub, NotificationKind, Topic};
///
/// # async fn example(session: callcenter_core::call::CallSession) {
/// let hub = NotificationHub::new(64);
/// let mut alice = hub.subscribe(&Topic::Agent("alice".into()));
///
/// hub.ring(&session, &["alice".into(), "bob".into()], None);
/// assert_eq!(alice.recv().await.unwrap().kind, NotificationKind::Ringing);
///
/// // bob took it
/// hub.withdraw(&session.id, Some(&"bob".into()));
/// assert_eq!(alice.recv().await.unwrap().kind, NotificationKind::Withdrawn);
/// # }
/// ```
#[derive(Clone)]
pub struct NotificationHub {
    topics: Arc<DashMap<Topic, broadcast::Sender<Notification>>>,
    pending: Arc<DashMap<CallId, PendingRing>>,
    capacity: usize,
    published: Arc<AtomicU64>,
    undelivered: Arc<AtomicU64>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            published: Arc::new(AtomicU64::new(0)),
            undelivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Notification> {
        self.topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map(|s| s.receiver_count()).unwrap_or(0)
    }

    /// Publish to one topic; returns how many subscribers received it
    pub fn publish(&self, topic: &Topic, notification: Notification) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let delivered = match self.topics.get(topic) {
            Some(sender) => sender.send(notification).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
            self.topics.remove_if(topic, |_, sender| sender.receiver_count() == 0);
        }
        delivered
    }

    fn publish_scoped(&self, notification: Notification) -> usize {
        let mut delivered = 0;
        if let Some(agent) = &notification.agent_id {
            delivered += self.publish(&Topic::Agent(agent.clone()), notification.clone());
        }
        if let Some(campaign) = &notification.campaign_id {
            delivered += self.publish(&Topic::Campaign(campaign.clone()), notification);
        }
        delivered
    }

    /// Ring `agents` for a call and remember them as pending
    pub fn ring(&self, session: &CallSession, agents: &[AgentId], priority: Option<RoutingPriority>) -> usize {
        let mut template = Notification::for_call(NotificationKind::Ringing, session);
        template.priority = priority;

        let mut delivered = 0;
        for agent in agents {
            delivered += self.publish(
                &Topic::Agent(agent.clone()),
                template.clone().with_agent(agent.clone()),
            );
        }
        if let Some(campaign) = &session.campaign_id {
            delivered += self.publish(&Topic::Campaign(campaign.clone()), template.clone());
        }

        self.pending
            .entry(session.id.clone())
            .and_modify(|ring| ring.agents.extend(agents.iter().cloned()))
            .or_insert_with(|| PendingRing {
                template,
                agents: agents.iter().cloned().collect(),
            });

        debug!("🔔 Rang {} agents for call {} ({} deliveries)", agents.len(), session.id, delivered);
        delivered
    }

    /// Agents currently being rung for a call
    pub fn pending_for(&self, call_id: &CallId) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .pending
            .get(call_id)
            .map(|ring| ring.agents.iter().cloned().collect())
            .unwrap_or_default();
        agents.sort();
        agents
    }

    /// Withdraw every pending ringing notification for a call except `except`'s
    ///
    /// Returns the agents a withdraw was sent to. A second withdraw for the same call
    /// sends nothing.
    pub fn withdraw(&self, call_id: &CallId, except: Option<&AgentId>) -> Vec<AgentId> {
        let Some((_, ring)) = self.pending.remove(call_id) else {
            return Vec::new();
        };

        let mut withdrawn = Vec::new();
        for agent in ring.agents {
            if Some(&agent) == except {
                continue;
            }
            let mut notification = ring.template.clone().with_agent(agent.clone());
            notification.kind = NotificationKind::Withdrawn;
            notification.id = uuid::Uuid::new_v4().to_string();
            self.publish(&Topic::Agent(agent.clone()), notification);
            withdrawn.push(agent);
        }
        if !withdrawn.is_empty() {
            info!("🔕 Withdrew call {} from {} agents", call_id, withdrawn.len());
        }
        withdrawn
    }

    /// Withdraw one agent's pending notification; `false` if it was already withdrawn
    pub fn withdraw_agent(&self, call_id: &CallId, agent: &AgentId) -> bool {
        let notification = {
            let Some(mut ring) = self.pending.get_mut(call_id) else {
                return false;
            };
            if !ring.agents.remove(agent) {
                return false;
            }
            let mut notification = ring.template.clone().with_agent(agent.clone());
            notification.kind = NotificationKind::Withdrawn;
            notification.id = uuid::Uuid::new_v4().to_string();
            notification
        };
        self.pending.remove_if(call_id, |_, ring| ring.agents.is_empty());
        self.publish(&Topic::Agent(agent.clone()), notification);
        true
    }

    pub fn notify_answered(&self, session: &CallSession, agent: &AgentId) -> usize {
        let notification = Notification::for_call(NotificationKind::Answered, session).with_agent(agent.clone());
        self.publish_scoped(notification)
    }

    /// Retract anything still ringing for the call, then announce the end
    pub fn notify_ended(&self, session: &CallSession) -> usize {
        self.withdraw(&session.id, None);
        self.publish_scoped(Notification::for_call(NotificationKind::Ended, session))
    }

    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            topics: self.topics.len(),
            pending_calls: self.pending.len(),
            published: self.published.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
        }
    }
}
