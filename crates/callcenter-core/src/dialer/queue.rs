//! # Dial Queue
//!
//! Per-campaign ordered work list of contacts to dial. Entries move
//! `queued → dialing → completed | failed`; a `dialing` entry may revert to `queued`
//! when its dial is released before connecting. Completed and failed entries stay in
//! the queue as history up to a per-queue limit, oldest dropped first; the stats keep
//! counting them after they are dropped.
//!
//! Ordering is by priority (lower number first), then by enqueue order.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CallCenterError, Result};
use crate::ids::{AgentId, CallId, CampaignId, ContactId, QueueEntryId};

/// Queue entry lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Queued,
    Dialing,
    Completed,
    Failed,
}

impl QueueEntryStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, QueueEntryStatus::Completed | QueueEntryStatus::Failed)
    }
}

impl fmt::Display for QueueEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueEntryStatus::Queued => write!(f, "queued"),
            QueueEntryStatus::Dialing => write!(f, "dialing"),
            QueueEntryStatus::Completed => write!(f, "completed"),
            QueueEntryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One contact waiting to be (or being) dialed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialQueueEntry {
    pub id: QueueEntryId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub status: QueueEntryStatus,
    pub assigned_agent_id: Option<AgentId>,
    /// Lower is dialed first
    pub priority: u8,
    pub queued_at: DateTime<Utc>,
    pub dialed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub notes: Option<String>,
    /// Call placed for the latest dial
    pub call_id: Option<CallId>,
    #[serde(skip)]
    seq: u64,
}

/// Queue depth by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub dialing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Finished entries kept by [`DialQueue::new`]
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Dial queue for one campaign
#[derive(Debug)]
pub struct DialQueue {
    campaign_id: CampaignId,
    entries: HashMap<QueueEntryId, DialQueueEntry>,
    /// contact -> its single queued or dialing entry
    open_by_contact: HashMap<ContactId, QueueEntryId>,
    /// contact -> its single dialing entry
    dialing_by_contact: HashMap<ContactId, QueueEntryId>,
    call_index: HashMap<CallId, QueueEntryId>,
    /// Finished entries, oldest first
    finished: VecDeque<QueueEntryId>,
    history_limit: usize,
    completed_total: usize,
    failed_total: usize,
    next_seq: u64,
}

impl DialQueue {
    pub fn new(campaign_id: CampaignId) -> Self {
        Self::with_history_limit(campaign_id, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(campaign_id: CampaignId, history_limit: usize) -> Self {
        Self {
            campaign_id,
            entries: HashMap::new(),
            open_by_contact: HashMap::new(),
            dialing_by_contact: HashMap::new(),
            call_index: HashMap::new(),
            finished: VecDeque::new(),
            history_limit,
            completed_total: 0,
            failed_total: 0,
            next_seq: 0,
        }
    }

    pub fn campaign_id(&self) -> &CampaignId {
        &self.campaign_id
    }

    /// Add a contact to the queue
    ///
    /// A contact may have several historical entries but at most one open
    /// (`queued` or `dialing`) entry; enqueueing it again returns the open entry.
    ///
    /// ```
    /// use callcenter_core::dialer::DialQueue;
    ///
    /// let mut queue = DialQueue::new("renewals".into());
    /// let low = queue.enqueue("c-1".into(), 5, None);
    /// let high = queue.enqueue("c-2".into(), 1, None);
    /// assert_eq!(queue.enqueue("c-1".into(), 0, None), low);
    ///
    /// let order: Vec<_> = queue.queued_in_order().into_iter().map(|e| e.id).collect();
    /// assert_eq!(order, vec![high, low]);
    /// ```
    pub fn enqueue(&mut self, contact_id: ContactId, priority: u8, notes: Option<String>) -> QueueEntryId {
        if let Some(open) = self.open_by_contact.get(&contact_id) {
            debug!("Contact {} already queued as {}", contact_id, open);
            return open.clone();
        }

        let entry = DialQueueEntry {
            id: QueueEntryId::new(),
            campaign_id: self.campaign_id.clone(),
            contact_id,
            status: QueueEntryStatus::Queued,
            assigned_agent_id: None,
            priority,
            queued_at: Utc::now(),
            dialed_at: None,
            completed_at: None,
            outcome: None,
            notes,
            call_id: None,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        debug!("📋 Enqueued contact {} in campaign {} (priority {})", entry.contact_id, self.campaign_id, priority);
        let id = entry.id.clone();
        self.open_by_contact.insert(entry.contact_id.clone(), id.clone());
        self.entries.insert(id.clone(), entry);
        id
    }

    pub fn get(&self, entry_id: &QueueEntryId) -> Option<&DialQueueEntry> {
        self.entries.get(entry_id)
    }

    pub fn entry_for_call(&self, call_id: &CallId) -> Option<&DialQueueEntry> {
        self.call_index.get(call_id).and_then(|id| self.entries.get(id))
    }

    /// Queued entries in dial order
    pub fn queued_in_order(&self) -> Vec<DialQueueEntry> {
        let mut queued: Vec<DialQueueEntry> = self
            .entries
            .values()
            .filter(|e| e.status == QueueEntryStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|e| (e.priority, e.seq));
        queued
    }

    pub fn dialing_entries(&self) -> Vec<DialQueueEntry> {
        self.entries
            .values()
            .filter(|e| e.status == QueueEntryStatus::Dialing)
            .cloned()
            .collect()
    }

    pub fn queued_depth(&self) -> usize {
        self.entries.values().filter(|e| e.status == QueueEntryStatus::Queued).count()
    }

    pub fn dialing_count(&self) -> usize {
        self.dialing_by_contact.len()
    }

    /// Move a queued entry to dialing
    ///
    /// Fails when the entry is not queued or its contact already has a dialing entry.
    pub fn mark_dialing(&mut self, entry_id: &QueueEntryId) -> Result<DialQueueEntry> {
        let entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| CallCenterError::not_found(format!("queue entry {}", entry_id)))?;

        if entry.status != QueueEntryStatus::Queued {
            return Err(CallCenterError::validation(format!(
                "queue entry {} is {}, not queued",
                entry_id, entry.status
            )));
        }
        if let Some(other) = self.dialing_by_contact.get(&entry.contact_id) {
            return Err(CallCenterError::LockContention(format!(
                "{} (already dialing as {})",
                entry.contact_id, other
            )));
        }

        entry.status = QueueEntryStatus::Dialing;
        entry.dialed_at = Some(Utc::now());
        self.dialing_by_contact.insert(entry.contact_id.clone(), entry_id.clone());
        Ok(entry.clone())
    }

    /// Attach the placed call to a dialing entry
    pub fn link_call(&mut self, entry_id: &QueueEntryId, call_id: CallId) -> Result<()> {
        let entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| CallCenterError::not_found(format!("queue entry {}", entry_id)))?;
        entry.call_id = Some(call_id.clone());
        self.call_index.insert(call_id, entry_id.clone());
        Ok(())
    }

    pub fn assign_agent(&mut self, entry_id: &QueueEntryId, agent_id: AgentId) -> Result<()> {
        let entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| CallCenterError::not_found(format!("queue entry {}", entry_id)))?;
        entry.assigned_agent_id = Some(agent_id);
        Ok(())
    }

    fn close_dialing(&mut self, entry_id: &QueueEntryId) -> Option<&mut DialQueueEntry> {
        let entry = self.entries.get_mut(entry_id)?;
        if entry.status != QueueEntryStatus::Dialing {
            return None;
        }
        self.dialing_by_contact.remove(&entry.contact_id);
        if let Some(call_id) = &entry.call_id {
            self.call_index.remove(call_id);
        }
        Some(entry)
    }

    /// Record a newly finished entry and drop the oldest history past the limit
    fn retire(&mut self, entry: &DialQueueEntry) {
        self.open_by_contact.remove(&entry.contact_id);
        match entry.status {
            QueueEntryStatus::Completed => self.completed_total += 1,
            QueueEntryStatus::Failed => self.failed_total += 1,
            QueueEntryStatus::Queued | QueueEntryStatus::Dialing => return,
        }
        self.finished.push_back(entry.id.clone());
        while self.finished.len() > self.history_limit {
            if let Some(oldest) = self.finished.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Put a dialing entry back in the queue. `None` if it was not dialing.
    pub fn revert_to_queued(&mut self, entry_id: &QueueEntryId, reason: &str) -> Option<DialQueueEntry> {
        let entry = self.close_dialing(entry_id)?;
        entry.status = QueueEntryStatus::Queued;
        entry.call_id = None;
        entry.dialed_at = None;
        entry.assigned_agent_id = None;
        entry.outcome = Some(reason.to_string());
        info!("↩️ Queue entry {} reverted to queued ({})", entry_id, reason);
        Some(entry.clone())
    }

    /// Close a dialing entry as completed or failed
    ///
    /// Only the first caller for a given dial wins; later calls (or calls naming a
    /// different `call_id`) return `None`.
    pub fn finish(
        &mut self,
        entry_id: &QueueEntryId,
        call_id: Option<&CallId>,
        status: QueueEntryStatus,
        outcome: &str,
    ) -> Option<DialQueueEntry> {
        debug_assert!(status.is_final());
        if let (Some(expected), Some(entry)) = (call_id, self.entries.get(entry_id)) {
            if entry.call_id.as_ref() != Some(expected) {
                return None;
            }
        }
        let entry = self.close_dialing(entry_id)?;
        entry.status = status;
        entry.completed_at = Some(Utc::now());
        entry.outcome = Some(outcome.to_string());
        let finished = entry.clone();
        self.retire(&finished);
        Some(finished)
    }

    /// Fail a queued entry that can no longer be dialed
    pub fn fail_queued(&mut self, entry_id: &QueueEntryId, outcome: &str) -> Option<DialQueueEntry> {
        let entry = self.entries.get_mut(entry_id)?;
        if entry.status != QueueEntryStatus::Queued {
            return None;
        }
        entry.status = QueueEntryStatus::Failed;
        entry.completed_at = Some(Utc::now());
        entry.outcome = Some(outcome.to_string());
        let failed = entry.clone();
        self.retire(&failed);
        Some(failed)
    }

    /// Open entries plus retained history, queued first in dial order, then the rest oldest first
    pub fn snapshot(&self) -> Vec<DialQueueEntry> {
        let mut all: Vec<DialQueueEntry> = self.entries.values().cloned().collect();
        all.sort_by_key(|e| (e.status != QueueEntryStatus::Queued, e.priority, e.seq));
        all
    }

    /// Open entries by status, plus every entry ever finished
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.queued_depth(),
            dialing: self.dialing_count(),
            completed: self.completed_total,
            failed: self.failed_total,
        }
    }
}
