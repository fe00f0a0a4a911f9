//! # Call Registry
//!
//! The single source of truth for live calls. Owns the live table, the provider-id
//! index, the durable mirror, and the lifecycle event broadcast every other component
//! reconciles against.
//!
//! ## Status updates
//!
//! Provider status pushes are mapped through the exhaustive vocabulary table in
//! [`CallStatus::from_provider`] and only ever move a session to a strictly higher rank.
//! Duplicate, late and out-of-order pushes are no-ops, so the provider may redeliver
//! freely.
//!
//! ## Mid-call actions
//!
//! [`CallRegistry::transition`] applies hold / mute / recording / transfer
//! optimistically, then asks the provider. A rejection rolls the touched flag back; an
//! unreachable provider (retry exhausted) ends the call with reason
//! `adapter_unreachable`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::error::{CallCenterError, Result};
use crate::ids::{AgentId, CallId, ProviderCallId};
use crate::provider::{CallControlAdapter, ProviderInstruction};

use super::store::{CallRecordSink, CallStore};
use super::types::{
    CallAction, CallDirection, CallLifecycleEvent, CallSession, CallStatus, CompletedCallRecord,
    EndReason, NewCall,
};

/// How long ended sessions stay answerable by id after they leave the live table
const ENDED_RETENTION_SECS: i64 = 600;

/// Registry of live calls
///
/// Cheap to clone; all clones share the same tables.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use callcenter_core::call::{CallRegistry, CallStatus, MemoryCallStore, NewCall};
/// use callcenter_core::config::ProviderConfig;
/// use callcenter_core::provider::{CallControlAdapter, SimulatedProvider};
///
/// # async fn example() -> callcenter_core::Result<()> {
/// let adapter = Arc::new(CallControlAdapter::new(
///     Arc::new(SimulatedProvider::new()),
///     &ProviderConfig::default(),
/// ));
/// let store = Arc::new(MemoryCallStore::new());
/// let registry = CallRegistry::new(adapter, store.clone(), store, 64);
///
/// let session = registry.create(NewCall::outbound("+15551230000")).await?;
/// let session = registry.place_call(&session.id, None).await?;
/// let session = registry.apply_provider_status(&session.id, "ringing").await?;
/// assert_eq!(session.status, CallStatus::Ringing);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CallRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    live: DashMap<CallId, CallSession>,
    by_provider: DashMap<ProviderCallId, CallId>,
    recently_ended: DashMap<CallId, CallSession>,
    store: Arc<dyn CallStore>,
    records: Arc<dyn CallRecordSink>,
    adapter: Arc<CallControlAdapter>,
    events: broadcast::Sender<CallLifecycleEvent>,
    created_total: AtomicU64,
    ended_total: AtomicU64,
}

/// Registry snapshot for stats endpoints
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryStats {
    pub live: usize,
    pub initiated: usize,
    pub ringing: usize,
    pub in_progress: usize,
    pub created_total: u64,
    pub ended_total: u64,
}

/// Flag value a mid-call action overwrote, restored if the provider refuses it
enum Rollback {
    OnHold(bool),
    Muted(bool),
    Recording(bool),
    Transfer(Option<String>),
}

impl Rollback {
    fn restore(self, session: &mut CallSession) {
        match self {
            Rollback::OnHold(v) => session.on_hold = v,
            Rollback::Muted(v) => session.muted = v,
            Rollback::Recording(v) => session.recording = v,
            Rollback::Transfer(v) => {
                session.transfer_target = v;
                session.metadata.remove("transferred");
            }
        }
    }
}

enum StatusStep {
    Unchanged(CallSession),
    Terminal,
    Advanced(CallSession, CallStatus),
}

/// Apply `action` to the session flags. `None` when the action changes nothing.
fn apply_action(session: &mut CallSession, action: &CallAction) -> Option<(Rollback, ProviderInstruction)> {
    match action {
        CallAction::Hold if !session.on_hold => {
            session.on_hold = true;
            Some((Rollback::OnHold(false), ProviderInstruction::Hold))
        }
        CallAction::Unhold if session.on_hold => {
            session.on_hold = false;
            Some((Rollback::OnHold(true), ProviderInstruction::Unhold))
        }
        CallAction::Mute if !session.muted => {
            session.muted = true;
            Some((Rollback::Muted(false), ProviderInstruction::Mute))
        }
        CallAction::Unmute if session.muted => {
            session.muted = false;
            Some((Rollback::Muted(true), ProviderInstruction::Unmute))
        }
        CallAction::StartRecording if !session.recording => {
            session.recording = true;
            Some((Rollback::Recording(false), ProviderInstruction::StartRecording))
        }
        CallAction::StopRecording if session.recording => {
            session.recording = false;
            Some((Rollback::Recording(true), ProviderInstruction::StopRecording))
        }
        CallAction::Transfer { target } => {
            let previous = session.transfer_target.replace(target.clone());
            session.metadata.insert("transferred".to_string(), "true".to_string());
            Some((
                Rollback::Transfer(previous),
                ProviderInstruction::Transfer { target: target.clone() },
            ))
        }
        _ => None,
    }
}

impl CallRegistry {
    pub fn new(
        adapter: Arc<CallControlAdapter>,
        store: Arc<dyn CallStore>,
        records: Arc<dyn CallRecordSink>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(16));
        Self {
            inner: Arc::new(RegistryInner {
                live: DashMap::new(),
                by_provider: DashMap::new(),
                recently_ended: DashMap::new(),
                store,
                records,
                adapter,
                events,
                created_total: AtomicU64::new(0),
                ended_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn adapter(&self) -> &Arc<CallControlAdapter> {
        &self.inner.adapter
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<CallLifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Live session, or a recently ended one
    pub fn get(&self, call_id: &CallId) -> Option<CallSession> {
        self.inner
            .live
            .get(call_id)
            .map(|s| s.clone())
            .or_else(|| self.inner.recently_ended.get(call_id).map(|s| s.clone()))
    }

    pub fn is_live(&self, call_id: &CallId) -> bool {
        self.inner
            .live
            .get(call_id)
            .map(|s| !s.status.is_terminal())
            .unwrap_or(false)
    }

    pub fn find_by_provider_id(&self, provider_call_id: &ProviderCallId) -> Option<CallSession> {
        let call_id = self.inner.by_provider.get(provider_call_id)?.clone();
        self.get(&call_id)
    }

    pub fn live_calls(&self) -> Vec<CallSession> {
        self.inner.live.iter().map(|s| s.value().clone()).collect()
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Agents currently holding a live call, on any campaign or inbound line
    pub fn agents_on_calls(&self) -> HashSet<AgentId> {
        self.inner
            .live
            .iter()
            .filter(|s| !s.status.is_terminal())
            .filter_map(|s| s.agent_id.clone())
            .collect()
    }

    fn emit(&self, event: CallLifecycleEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    async fn persist(&self, session: &CallSession) {
        if let Err(e) = self.inner.store.save(session).await {
            warn!("⚠️ Failed to mirror call {}: {}", session.id, e);
        }
    }

    fn persist_in_background(&self, session: CallSession) {
        let store = self.inner.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&session).await {
                warn!("⚠️ Failed to mirror call {}: {}", session.id, e);
            }
        });
    }

    /// Create a session in `initiated` and mirror it before anything is sent to the
    /// provider, so a crash after dialing still leaves a record to recover
    pub async fn create(&self, call: NewCall) -> Result<CallSession> {
        if call.phone_number.trim().is_empty() {
            return Err(CallCenterError::validation("phone number cannot be empty"));
        }

        let session = CallSession::new(call, CallStatus::Initiated);
        self.inner.store.save(&session).await?;

        if let Some(pid) = &session.provider_call_id {
            self.inner.by_provider.insert(pid.clone(), session.id.clone());
        }
        self.inner.live.insert(session.id.clone(), session.clone());
        self.inner.created_total.fetch_add(1, Ordering::Relaxed);

        debug!("📞 Created {} call {} to {}", session.direction, session.id, session.phone_number);
        self.emit(CallLifecycleEvent::Created(session.clone()));
        Ok(session)
    }

    /// Create a ringing inbound session for a provider call
    ///
    /// Idempotent on the provider call id: a redelivered webhook returns the session
    /// created the first time. The mirror write runs in the background so webhook
    /// handling stays inside its response budget.
    pub fn create_inbound(&self, call: NewCall) -> Result<(CallSession, bool)> {
        let pid = call
            .provider_call_id
            .clone()
            .ok_or_else(|| CallCenterError::validation("inbound call requires a provider call id"))?;

        let session = CallSession::new(call, CallStatus::Ringing);
        let call_id = match self.inner.by_provider.entry(pid) {
            dashmap::mapref::entry::Entry::Occupied(existing) => existing.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                self.inner.live.insert(session.id.clone(), session.clone());
                slot.insert(session.id.clone());
                self.inner.created_total.fetch_add(1, Ordering::Relaxed);
                self.persist_in_background(session.clone());
                info!("📞 Inbound call {} from {}", session.id, session.phone_number);
                self.emit(CallLifecycleEvent::Created(session.clone()));
                return Ok((session, true));
            }
        };

        let existing = self
            .get(&call_id)
            .ok_or_else(|| CallCenterError::not_found(format!("call {}", call_id)))?;
        debug!("🔁 Duplicate inbound webhook for {}", call_id);
        Ok((existing, false))
    }

    /// Ask the provider to place a created outbound call
    ///
    /// On rejection or an unreachable provider the session is ended (`failed` with
    /// reason `provider_rejected` / `adapter_unreachable`) and the error is returned.
    pub async fn place_call(&self, call_id: &CallId, from: Option<&str>) -> Result<CallSession> {
        let phone_number = self
            .inner
            .live
            .get(call_id)
            .map(|s| s.phone_number.clone())
            .ok_or_else(|| CallCenterError::not_found(format!("call {}", call_id)))?;

        match self.inner.adapter.place_call(&phone_number, from).await {
            Ok(pid) => self.link_provider_id(call_id, pid).await,
            Err(e) => {
                let reason = match e {
                    CallCenterError::ProviderRejected(_) => EndReason::ProviderRejected,
                    _ => EndReason::AdapterUnreachable,
                };
                warn!("❌ Placing call {} failed: {}", call_id, e);
                if let Err(end_err) = self.end(call_id, reason).await {
                    debug!("Call {} already gone while failing placement: {}", call_id, end_err);
                }
                Err(e)
            }
        }
    }

    /// Attach the provider's id to a session
    pub async fn link_provider_id(&self, call_id: &CallId, pid: ProviderCallId) -> Result<CallSession> {
        let snapshot = match self.inner.live.get_mut(call_id) {
            Some(mut session) if !session.status.is_terminal() => {
                session.provider_call_id = Some(pid.clone());
                session.clone()
            }
            _ => {
                // Ended while the provider was placing it; drop the provider leg
                warn!("🧹 Call {} ended before provider id {} arrived, hanging up", call_id, pid);
                let adapter = self.inner.adapter.clone();
                tokio::spawn(async move {
                    if let Err(e) = adapter.end_call(&pid).await {
                        warn!("Failed to hang up orphaned provider call {}: {}", pid, e);
                    }
                });
                return self
                    .get(call_id)
                    .ok_or_else(|| CallCenterError::not_found(format!("call {}", call_id)));
            }
        };

        self.inner.by_provider.insert(pid, call_id.clone());
        self.persist(&snapshot).await;
        self.emit(CallLifecycleEvent::Updated(snapshot.clone()));
        Ok(snapshot)
    }

    /// Apply a provider status push
    ///
    /// Only strictly forward progress changes the session; anything else returns the
    /// current state unchanged. A terminal status ends the session.
    pub async fn apply_provider_status(&self, call_id: &CallId, provider_status: &str) -> Result<CallSession> {
        if !CallStatus::is_known_provider_status(provider_status) {
            warn!("❓ Unknown provider status '{}' for call {}, treating as failed", provider_status, call_id);
        }
        let next = CallStatus::from_provider(provider_status);

        let step = match self.inner.live.get_mut(call_id) {
            None => StatusStep::Unchanged(
                self.inner
                    .recently_ended
                    .get(call_id)
                    .map(|s| s.clone())
                    .ok_or_else(|| CallCenterError::not_found(format!("call {}", call_id)))?,
            ),
            Some(session) if !session.status.can_advance_to(next) => {
                debug!(
                    "⏭️ Ignoring provider status {} for call {} (currently {})",
                    next, call_id, session.status
                );
                StatusStep::Unchanged(session.clone())
            }
            Some(_) if next.is_terminal() => StatusStep::Terminal,
            Some(mut session) => {
                let previous = session.status;
                session.status = next;
                if next == CallStatus::InProgress && session.answered_at.is_none() {
                    session.answered_at = Some(Utc::now());
                }
                StatusStep::Advanced(session.clone(), previous)
            }
        };

        let (snapshot, previous) = match step {
            StatusStep::Unchanged(session) => return Ok(session),
            StatusStep::Terminal => return self.end(call_id, EndReason::Provider(next)).await,
            StatusStep::Advanced(session, previous) => (session, previous),
        };

        info!("📶 Call {} {} -> {}", call_id, previous, snapshot.status);
        self.persist(&snapshot).await;
        self.emit(CallLifecycleEvent::StatusChanged {
            session: snapshot.clone(),
            previous,
        });
        Ok(snapshot)
    }

    /// Status push addressed by provider call id
    pub async fn apply_provider_status_by_provider_id(
        &self,
        provider_call_id: &ProviderCallId,
        provider_status: &str,
    ) -> Result<CallSession> {
        let call_id = self
            .inner
            .by_provider
            .get(provider_call_id)
            .map(|id| id.clone())
            .ok_or_else(|| CallCenterError::not_found(format!("provider call {}", provider_call_id)))?;
        self.apply_provider_status(&call_id, provider_status).await
    }

    /// Apply a mid-call action; requires `in_progress`
    pub async fn transition(&self, call_id: &CallId, action: CallAction) -> Result<CallSession> {
        let (rollback, instruction, pid, optimistic) = {
            let mut session = self
                .inner
                .live
                .get_mut(call_id)
                .ok_or_else(|| CallCenterError::not_found(format!("call {}", call_id)))?;

            if session.status != CallStatus::InProgress {
                return Err(CallCenterError::invalid_transition(
                    call_id.as_str(),
                    session.status,
                    &action,
                ));
            }

            let pid = session
                .provider_call_id
                .clone()
                .ok_or_else(|| CallCenterError::internal(format!("call {} has no provider id", call_id)))?;

            match apply_action(&mut session, &action) {
                Some((rollback, instruction)) => (rollback, instruction, pid, session.clone()),
                None => return Ok(session.clone()),
            }
        };

        match self.inner.adapter.update_call(&pid, &instruction).await {
            Ok(()) => {
                info!("🎛️ Call {} {}", call_id, action);
                let current = self.get(call_id).unwrap_or(optimistic);
                self.persist(&current).await;
                self.emit(CallLifecycleEvent::Updated(current.clone()));
                Ok(current)
            }
            Err(e) => {
                if let Some(mut session) = self.inner.live.get_mut(call_id) {
                    rollback.restore(&mut session);
                }
                warn!("↩️ Rolled back {} on call {}: {}", action, call_id, e);
                if matches!(e, CallCenterError::AdapterUnavailable(_)) {
                    if let Err(end_err) = self.end(call_id, EndReason::AdapterUnreachable).await {
                        debug!("Call {} already gone: {}", call_id, end_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Atomically claim a ringing inbound call for an agent
    ///
    /// Exactly one of any number of concurrent claims succeeds; the others get
    /// [`CallCenterError::AlreadyClaimed`]. A repeated claim by the winner is a no-op and
    /// returns `false` alongside the session.
    pub async fn claim(&self, call_id: &CallId, agent_id: &AgentId) -> Result<(CallSession, bool)> {
        let (snapshot, previous) = {
            let Some(mut session) = self.inner.live.get_mut(call_id) else {
                return Err(match self.inner.recently_ended.get(call_id) {
                    Some(ended) => match &ended.agent_id {
                        Some(owner) => CallCenterError::AlreadyClaimed {
                            call_id: call_id.to_string(),
                            agent_id: owner.to_string(),
                        },
                        None => CallCenterError::invalid_transition(call_id.as_str(), ended.status, "claim"),
                    },
                    None => CallCenterError::not_found(format!("call {}", call_id)),
                });
            };

            if let Some(owner) = &session.agent_id {
                if owner == agent_id {
                    return Ok((session.clone(), false));
                }
                return Err(CallCenterError::AlreadyClaimed {
                    call_id: call_id.to_string(),
                    agent_id: owner.to_string(),
                });
            }

            if session.direction != CallDirection::Inbound || session.status.is_terminal() {
                return Err(CallCenterError::invalid_transition(call_id.as_str(), session.status, "claim"));
            }

            let previous = session.status;
            session.agent_id = Some(agent_id.clone());
            session.status = CallStatus::InProgress;
            session.answered_at = Some(Utc::now());
            (session.clone(), previous)
        };

        info!("🙋 Agent {} claimed call {}", agent_id, call_id);
        self.persist(&snapshot).await;
        self.emit(CallLifecycleEvent::StatusChanged {
            session: snapshot.clone(),
            previous,
        });
        Ok((snapshot, true))
    }

    /// Record which agent is talking on a connected outbound call
    pub async fn assign_agent(&self, call_id: &CallId, agent_id: &AgentId) -> Result<CallSession> {
        let snapshot = {
            let mut session = self
                .inner
                .live
                .get_mut(call_id)
                .ok_or_else(|| CallCenterError::not_found(format!("call {}", call_id)))?;
            if session.status.is_terminal() {
                return Err(CallCenterError::invalid_transition(call_id.as_str(), session.status, "assign agent"));
            }
            session.agent_id = Some(agent_id.clone());
            session.clone()
        };

        self.persist(&snapshot).await;
        self.emit(CallLifecycleEvent::Updated(snapshot.clone()));
        Ok(snapshot)
    }

    /// Tag a live, unclaimed session with `key = value` in one write
    ///
    /// Returns `None` when the session is gone, terminal, already claimed, or already
    /// carries that value, so exactly one of several racing callers gets the session back.
    pub fn tag_unclaimed(&self, call_id: &CallId, key: &str, value: &str) -> Option<CallSession> {
        let snapshot = {
            let mut session = self.inner.live.get_mut(call_id)?;
            if session.status.is_terminal()
                || session.agent_id.is_some()
                || session.metadata.get(key).map(String::as_str) == Some(value)
            {
                return None;
            }
            session.metadata.insert(key.to_string(), value.to_string());
            session.clone()
        };
        self.persist_in_background(snapshot.clone());
        Some(snapshot)
    }

    /// End a session
    ///
    /// Idempotent: ending an already ended session returns its final state. The mirror
    /// removal, the completed-call record and any provider hangup run in the background.
    pub async fn end(&self, call_id: &CallId, reason: EndReason) -> Result<CallSession> {
        let snapshot = {
            let Some(mut session) = self.inner.live.get_mut(call_id) else {
                return self
                    .inner
                    .recently_ended
                    .get(call_id)
                    .map(|s| s.clone())
                    .ok_or_else(|| CallCenterError::not_found(format!("call {}", call_id)));
            };

            if session.status.is_terminal() {
                return Ok(session.clone());
            }

            session.status = reason.terminal_status(session.status);
            session.end_time = Some(Utc::now());
            session.end_reason = Some(reason.clone());
            session.clone()
        };

        self.inner.recently_ended.insert(call_id.clone(), snapshot.clone());
        self.inner.live.remove(call_id);
        if let Some(pid) = &snapshot.provider_call_id {
            self.inner.by_provider.remove(pid);
        }
        self.inner.ended_total.fetch_add(1, Ordering::Relaxed);

        info!(
            "📴 Call {} ended: {} ({}, {}s)",
            call_id,
            snapshot.status,
            reason,
            snapshot.duration_secs().unwrap_or(0)
        );

        let store = self.inner.store.clone();
        let records = self.inner.records.clone();
        let adapter = self.inner.adapter.clone();
        let ended = snapshot.clone();
        tokio::spawn(async move {
            if let Err(e) = store.remove(&ended.id).await {
                warn!("⚠️ Failed to drop mirrored call {}: {}", ended.id, e);
            }
            if let Some(record) = CompletedCallRecord::from_session(&ended) {
                if let Err(e) = records.write_completed(&record).await {
                    error!("❌ Failed to write call record for {}: {}", ended.id, e);
                }
            }
            if reason.needs_provider_hangup() {
                if let Some(pid) = &ended.provider_call_id {
                    if let Err(e) = adapter.end_call(pid).await {
                        warn!("⚠️ Provider hangup for {} failed: {}", pid, e);
                    }
                }
            }
        });

        self.emit(CallLifecycleEvent::Ended(snapshot.clone()));
        Ok(snapshot)
    }

    /// Reload non-terminal sessions from the durable mirror after a restart
    pub async fn recover_from_store(&self) -> Result<usize> {
        let sessions = self.inner.store.load_active().await?;
        let mut recovered = 0;
        for session in sessions {
            if session.status.is_terminal() || self.inner.live.contains_key(&session.id) {
                continue;
            }
            if let Some(pid) = &session.provider_call_id {
                self.inner.by_provider.insert(pid.clone(), session.id.clone());
            }
            self.inner.live.insert(session.id.clone(), session);
            recovered += 1;
        }
        if recovered > 0 {
            info!("♻️ Recovered {} live calls from the durable mirror", recovered);
        }
        Ok(recovered)
    }

    /// Force a terminal status on sessions stuck past their liveness bounds
    pub async fn sweep_stalled(&self, config: &CallConfig) -> Vec<CallSession> {
        let now = Utc::now();
        let ringing_limit = ChronoDuration::seconds(config.ringing_timeout_secs as i64);
        let duration_limit = ChronoDuration::seconds(config.max_call_duration_secs as i64);

        let stalled: Vec<(CallId, EndReason)> = self
            .inner
            .live
            .iter()
            .filter_map(|entry| {
                let session = entry.value();
                match session.status {
                    CallStatus::Initiated | CallStatus::Ringing
                        if now - session.start_time > ringing_limit =>
                    {
                        Some((session.id.clone(), EndReason::RingingTimeout))
                    }
                    CallStatus::InProgress
                        if now - session.answered_at.unwrap_or(session.start_time) > duration_limit =>
                    {
                        Some((session.id.clone(), EndReason::MaxDurationExceeded))
                    }
                    _ => None,
                }
            })
            .collect();

        let mut ended = Vec::with_capacity(stalled.len());
        for (call_id, reason) in stalled {
            warn!("⏰ Call {} exceeded its liveness bound ({})", call_id, reason);
            if let Ok(session) = self.end(&call_id, reason).await {
                ended.push(session);
            }
        }

        let retention = ChronoDuration::seconds(ENDED_RETENTION_SECS);
        self.inner
            .recently_ended
            .retain(|_, s| s.end_time.map(|t| now - t < retention).unwrap_or(false));

        ended
    }

    /// Run [`sweep_stalled`](Self::sweep_stalled) every `sweep_interval` until shutdown
    pub fn spawn_sweeper(&self, config: CallConfig, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.sweep_stalled(&config).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Call sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            live: self.inner.live.len(),
            created_total: self.inner.created_total.load(Ordering::Relaxed),
            ended_total: self.inner.ended_total.load(Ordering::Relaxed),
            ..Default::default()
        };
        for session in self.inner.live.iter() {
            match session.status {
                CallStatus::Initiated => stats.initiated += 1,
                CallStatus::Ringing => stats.ringing += 1,
                CallStatus::InProgress => stats.in_progress += 1,
                _ => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::MemoryCallStore;
    use crate::config::ProviderConfig;
    use crate::provider::{SimulatedBehavior, SimulatedProvider};

    fn setup() -> (CallRegistry, Arc<SimulatedProvider>, Arc<MemoryCallStore>) {
        let provider = Arc::new(SimulatedProvider::new());
        let config = ProviderConfig {
            request_timeout_ms: 100,
            retry_backoff_ms: 5,
            ..ProviderConfig::default()
        };
        let adapter = Arc::new(CallControlAdapter::new(provider.clone(), &config));
        let store = Arc::new(MemoryCallStore::new());
        let registry = CallRegistry::new(adapter, store.clone(), store.clone(), 64);
        (registry, provider, store)
    }

    async fn connected_call(registry: &CallRegistry) -> CallSession {
        let session = registry.create(NewCall::outbound("+15551230000")).await.unwrap();
        registry.place_call(&session.id, None).await.unwrap();
        registry.apply_provider_status(&session.id, "in-progress").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_mirrors_before_dialing() {
        let (registry, provider, store) = setup();
        let session = registry.create(NewCall::outbound("+15551230000")).await.unwrap();

        assert_eq!(session.status, CallStatus::Initiated);
        assert!(store.mirrored(&session.id).is_some());
        assert!(provider.placed_calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_updates_are_monotonic_and_idempotent() {
        let (registry, _provider, _store) = setup();
        let session = registry.create(NewCall::outbound("+15551230000")).await.unwrap();
        let id = session.id.clone();

        assert_eq!(registry.apply_provider_status(&id, "ringing").await.unwrap().status, CallStatus::Ringing);
        assert_eq!(registry.apply_provider_status(&id, "ringing").await.unwrap().status, CallStatus::Ringing);
        assert_eq!(registry.apply_provider_status(&id, "in-progress").await.unwrap().status, CallStatus::InProgress);

        // late ringing after answer is ignored
        assert_eq!(registry.apply_provider_status(&id, "ringing").await.unwrap().status, CallStatus::InProgress);

        let ended = registry.apply_provider_status(&id, "completed").await.unwrap();
        assert_eq!(ended.status, CallStatus::Completed);

        // terminal is absorbing
        let again = registry.apply_provider_status(&id, "busy").await.unwrap();
        assert_eq!(again.status, CallStatus::Completed);
        assert!(!registry.is_live(&id));
    }

    #[tokio::test]
    async fn test_unknown_status_maps_to_failed() {
        let (registry, _provider, _store) = setup();
        let session = registry.create(NewCall::outbound("+15551230000")).await.unwrap();
        let ended = registry.apply_provider_status(&session.id, "vaporized").await.unwrap();
        assert_eq!(ended.status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn test_transition_requires_in_progress() {
        let (registry, _provider, _store) = setup();
        let session = registry.create(NewCall::outbound("+15551230000")).await.unwrap();
        registry.place_call(&session.id, None).await.unwrap();

        let err = registry.transition(&session.id, CallAction::Hold).await.unwrap_err();
        assert!(matches!(err, CallCenterError::InvalidStateTransition { .. }));
        assert!(!registry.get(&session.id).unwrap().on_hold);
    }

    #[tokio::test]
    async fn test_hold_round_trip_reaches_provider() {
        let (registry, provider, _store) = setup();
        let session = connected_call(&registry).await;

        let held = registry.transition(&session.id, CallAction::Hold).await.unwrap();
        assert!(held.on_hold);
        let unheld = registry.transition(&session.id, CallAction::Unhold).await.unwrap();
        assert!(!unheld.on_hold);

        let instructions: Vec<_> = provider.updates().into_iter().map(|(_, i)| i).collect();
        assert_eq!(instructions, vec![ProviderInstruction::Hold, ProviderInstruction::Unhold]);
    }

    #[tokio::test]
    async fn test_rejected_transition_rolls_back() {
        let (registry, provider, _store) = setup();
        let session = connected_call(&registry).await;

        provider.set_default_behavior(SimulatedBehavior::Reject("not allowed".into()));
        let err = registry.transition(&session.id, CallAction::Mute).await.unwrap_err();
        assert!(matches!(err, CallCenterError::ProviderRejected(_)));

        let current = registry.get(&session.id).unwrap();
        assert!(!current.muted);
        assert_eq!(current.status, CallStatus::InProgress);
    }

    #[tokio::test]
    async fn test_unreachable_adapter_fails_call() {
        let (registry, provider, _store) = setup();
        let session = connected_call(&registry).await;

        provider.set_default_behavior(SimulatedBehavior::Unavailable);
        let err = registry
            .transition(&session.id, CallAction::Transfer { target: "+15559990000".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CallCenterError::AdapterUnavailable(_)));

        let ended = registry.get(&session.id).unwrap();
        assert_eq!(ended.status, CallStatus::Failed);
        assert_eq!(ended.end_reason, Some(EndReason::AdapterUnreachable));
        assert_eq!(ended.transfer_target, None);
    }

    #[tokio::test]
    async fn test_end_is_idempotent_and_writes_one_record() {
        let (registry, _provider, store) = setup();
        let session = connected_call(&registry).await;

        let first = registry.end(&session.id, EndReason::Hangup).await.unwrap();
        let second = registry.end(&session.id, EndReason::Hangup).await.unwrap();
        assert_eq!(first.status, CallStatus::Completed);
        assert_eq!(first.end_time, second.end_time);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(store.records().await.len(), 1);
        assert!(store.mirrored(&session.id).is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (registry, _provider, _store) = setup();
        let (session, created) = registry
            .create_inbound(NewCall::inbound(ProviderCallId::from("CA1"), "+15550001111"))
            .unwrap();
        assert!(created);

        let alice = AgentId::from("alice");
        let bob = AgentId::from("bob");
        let (a, b) = tokio::join!(registry.claim(&session.id, &alice), registry.claim(&session.id, &bob));
        assert!(a.is_ok() ^ b.is_ok());

        let winner = registry.get(&session.id).unwrap().agent_id.unwrap();
        let loser = if winner == alice { &bob } else { &alice };
        assert!(matches!(
            registry.claim(&session.id, loser).await,
            Err(CallCenterError::AlreadyClaimed { .. })
        ));
        let (again, fresh) = registry.claim(&session.id, &winner).await.unwrap();
        assert!(!fresh);
        assert_eq!(again.status, CallStatus::InProgress);
    }

    #[tokio::test]
    async fn test_tag_unclaimed_is_single_shot_and_yields_to_claims() {
        let (registry, _provider, _store) = setup();
        let (first, _) = registry
            .create_inbound(NewCall::inbound(ProviderCallId::from("CA2"), "+15550001111"))
            .unwrap();
        assert!(registry.tag_unclaimed(&first.id, "routing_tier", "overflow").is_some());
        assert!(registry.tag_unclaimed(&first.id, "routing_tier", "overflow").is_none());

        let (second, _) = registry
            .create_inbound(NewCall::inbound(ProviderCallId::from("CA3"), "+15550002222"))
            .unwrap();
        registry.claim(&second.id, &AgentId::from("alice")).await.unwrap();
        assert!(registry.tag_unclaimed(&second.id, "routing_tier", "overflow").is_none());
        let claimed = registry.get(&second.id).unwrap();
        assert_ne!(claimed.metadata.get("routing_tier").map(String::as_str), Some("overflow"));

        assert_eq!(registry.agents_on_calls(), HashSet::from([AgentId::from("alice")]));
    }

    #[tokio::test]
    async fn test_duplicate_inbound_webhook_reuses_session() {
        let (registry, _provider, _store) = setup();
        let (first, _) = registry
            .create_inbound(NewCall::inbound(ProviderCallId::from("CA9"), "+15550001111"))
            .unwrap();
        let (second, created) = registry
            .create_inbound(NewCall::inbound(ProviderCallId::from("CA9"), "+15550001111"))
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_recover_from_store() {
        let (registry, _provider, store) = setup();
        let session = registry.create(NewCall::outbound("+15551230000")).await.unwrap();
        let pid = registry.place_call(&session.id, None).await.unwrap().provider_call_id.unwrap();

        let adapter = Arc::new(CallControlAdapter::new(
            Arc::new(SimulatedProvider::new()),
            &ProviderConfig::default(),
        ));
        let fresh = CallRegistry::new(adapter, store.clone(), store.clone(), 64);
        assert_eq!(fresh.recover_from_store().await.unwrap(), 1);
        assert_eq!(fresh.find_by_provider_id(&pid).unwrap().id, session.id);
    }

    #[tokio::test]
    async fn test_sweeper_ends_stalled_ringing() {
        let (registry, _provider, _store) = setup();
        let session = registry.create(NewCall::outbound("+15551230000")).await.unwrap();
        registry
            .inner
            .live
            .get_mut(&session.id)
            .unwrap()
            .start_time = Utc::now() - ChronoDuration::seconds(120);

        let config = CallConfig {
            ringing_timeout_secs: 60,
            ..CallConfig::default()
        };
        let ended = registry.sweep_stalled(&config).await;
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].status, CallStatus::NoAnswer);
        assert_eq!(ended[0].end_reason, Some(EndReason::RingingTimeout));
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_broadcast() {
        let (registry, _provider, _store) = setup();
        let mut events = registry.subscribe();
        let session = connected_call(&registry).await;
        registry.end(&session.id, EndReason::Hangup).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                CallLifecycleEvent::Created(_) => "created",
                CallLifecycleEvent::StatusChanged { .. } => "status",
                CallLifecycleEvent::Updated(_) => "updated",
                CallLifecycleEvent::Ended(_) => "ended",
            });
        }
        assert_eq!(kinds, vec!["created", "updated", "status", "ended"]);
    }
}
