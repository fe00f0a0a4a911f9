//! Builder for [`CallCenterEngine`]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::agent::{AgentDirectory, InMemoryAgentDirectory};
use crate::call::{CallRecordSink, CallRegistry, CallStore, MemoryCallStore};
use crate::config::CallCenterConfig;
use crate::contacts::{ContactStore, InMemoryContactStore, RetryPolicy};
use crate::database::DatabaseManager;
use crate::dialer::DialerService;
use crate::error::{CallCenterError, Result};
use crate::inbound::InboundRouter;
use crate::notify::NotificationHub;
use crate::provider::{CallControlAdapter, TelephonyProvider};

use super::engine::CallCenterEngine;

/// Assembles a [`CallCenterEngine`]
///
/// Only the provider is required. Missing collaborators default to the in-memory
/// implementations; the call mirror is SQLite when a database is supplied or
/// `database.enabled` is set, otherwise in-memory.
#[derive(Default)]
pub struct CallCenterEngineBuilder {
    config: Option<CallCenterConfig>,
    provider: Option<Arc<dyn TelephonyProvider>>,
    contacts: Option<Arc<dyn ContactStore>>,
    agents: Option<Arc<dyn AgentDirectory>>,
    call_store: Option<Arc<dyn CallStore>>,
    record_sink: Option<Arc<dyn CallRecordSink>>,
    database: Option<Arc<DatabaseManager>>,
}

impl CallCenterEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CallCenterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_contact_store(mut self, contacts: Arc<dyn ContactStore>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub fn with_agent_directory(mut self, agents: Arc<dyn AgentDirectory>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Override the live-call mirror (takes precedence over the database)
    pub fn with_call_store(mut self, store: Arc<dyn CallStore>) -> Self {
        self.call_store = Some(store);
        self
    }

    /// Override the completed-call record sink (takes precedence over the database)
    pub fn with_record_sink(mut self, sink: Arc<dyn CallRecordSink>) -> Self {
        self.record_sink = Some(sink);
        self
    }

    pub fn with_database(mut self, database: Arc<DatabaseManager>) -> Self {
        self.database = Some(database);
        self
    }

    pub async fn build(self) -> Result<Arc<CallCenterEngine>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let provider = self
            .provider
            .ok_or_else(|| CallCenterError::configuration("a telephony provider is required"))?;

        let db_manager = match self.database {
            Some(db) => Some(db),
            None if config.database.enabled => {
                Some(Arc::new(DatabaseManager::from_config(&config.database).await?))
            }
            None => None,
        };

        let memory = MemoryCallStore::new();
        let call_store: Arc<dyn CallStore> = match (self.call_store, &db_manager) {
            (Some(store), _) => store,
            (None, Some(db)) => db.clone(),
            (None, None) => Arc::new(memory.clone()),
        };
        let record_sink: Arc<dyn CallRecordSink> = match (self.record_sink, &db_manager) {
            (Some(sink), _) => sink,
            (None, Some(db)) => db.clone(),
            (None, None) => Arc::new(memory),
        };

        let contacts = self.contacts.unwrap_or_else(|| {
            Arc::new(InMemoryContactStore::with_policy(RetryPolicy::from_config(&config.dialer)))
        });
        let agents = self
            .agents
            .unwrap_or_else(|| Arc::new(InMemoryAgentDirectory::new()));

        let adapter = Arc::new(CallControlAdapter::new(provider, &config.provider));
        let registry = CallRegistry::new(
            adapter.clone(),
            call_store,
            record_sink,
            config.notifications.channel_capacity * 4,
        );
        let notifier = NotificationHub::new(config.notifications.channel_capacity);

        let dialer = DialerService::new(
            contacts.clone(),
            agents.clone(),
            registry.clone(),
            notifier.clone(),
            config.dialer.clone(),
            config.general.instance_id.clone(),
        );
        let inbound = InboundRouter::new(
            registry.clone(),
            contacts.clone(),
            agents.clone(),
            notifier.clone(),
            config.inbound.clone(),
        );

        let (shutdown_tx, _) = watch::channel(false);
        info!(
            "🏗️ Built call center engine (mirror: {})",
            if db_manager.is_some() { "sqlite" } else { "memory" }
        );

        Ok(Arc::new(CallCenterEngine {
            config,
            registry,
            adapter,
            notifier,
            dialer,
            inbound,
            contacts,
            agents,
            db_manager,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }))
    }
}
