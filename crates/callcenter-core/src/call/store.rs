//! Durable mirror and completed-call sink seams

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::ids::CallId;

use super::types::{CallSession, CompletedCallRecord};

/// Durable mirror of live sessions, read back on startup
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Insert or replace the mirrored session
    async fn save(&self, session: &CallSession) -> Result<()>;

    /// Drop a session from the mirror once it is terminal
    async fn remove(&self, call_id: &CallId) -> Result<()>;

    /// All sessions still mirrored as live
    async fn load_active(&self) -> Result<Vec<CallSession>>;
}

/// Destination for completed-call records
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    async fn write_completed(&self, record: &CompletedCallRecord) -> Result<()>;
}

/// In-process mirror and record sink
///
/// Keeps nothing across restarts; used when the SQLite mirror is disabled and in tests.
#[derive(Clone, Default)]
pub struct MemoryCallStore {
    sessions: Arc<DashMap<CallId, CallSession>>,
    records: Arc<Mutex<Vec<CompletedCallRecord>>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mirrored(&self, call_id: &CallId) -> Option<CallSession> {
        self.sessions.get(call_id).map(|s| s.clone())
    }

    pub fn mirrored_count(&self) -> usize {
        self.sessions.len()
    }

    pub async fn records(&self) -> Vec<CompletedCallRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn save(&self, session: &CallSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn remove(&self, call_id: &CallId) -> Result<()> {
        self.sessions.remove(call_id);
        Ok(())
    }

    async fn load_active(&self) -> Result<Vec<CallSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl CallRecordSink for MemoryCallStore {
    async fn write_completed(&self, record: &CompletedCallRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
