//! Core call center engine
//!
//! [`CallCenterEngine`] owns one instance of every component and the background tasks
//! that keep them consistent: the liveness sweeper, the dialer's event pump and the
//! notification pump that turns `Ended` lifecycle events into `ended` notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::AgentDirectory;
use crate::call::{CallLifecycleEvent, CallRegistry, RegistryStats};
use crate::config::CallCenterConfig;
use crate::contacts::ContactStore;
use crate::database::DatabaseManager;
use crate::dialer::{CampaignStats, DialerService};
use crate::error::Result;
use crate::inbound::{InboundRouter, RouterStats};
use crate::notify::{NotificationHub, NotificationStats};
use crate::provider::adapter::AdapterStats;
use crate::provider::CallControlAdapter;

use super::builder::CallCenterEngineBuilder;

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary call center orchestration engine
///
/// Wires the call registry, the provider adapter, the dialer, the inbound router and the
/// notification hub together. Build one with [`CallCenterEngine::builder`], then call
/// [`start`](Self::start) to recover mirrored calls and launch the background tasks.
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │             CallCenterEngine             │
/// ├──────────────────────────────────────────┤
/// │ ┌──────────────┐   ┌───────────────────┐ │
/// │ │ DialerService│   │  InboundRouter    │ │
/// │ └──────┬───────┘   └─────────┬─────────┘ │
/// │        │   ┌──────────────┐  │           │
/// │        └──►│ CallRegistry │◄─┘           │
/// │            └──────┬───────┘              │
/// │ ┌──────────────┐  │  ┌─────────────────┐ │
/// │ │NotificationHub│◄─┘  │ DatabaseManager │ │
/// │ └──────────────┘     └─────────────────┘ │
/// └──────────────────────────────────────────┘
/// ```
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use callcenter_core::prelude::*;
///
/// # async fn example() -> Result<()> {
/// let engine = CallCenterEngine::builder()
///     .with_provider(Arc::new(SimulatedProvider::new()))
///     .build()
///     .await?;
/// engine.start().await?;
///
/// let stats = engine.get_stats().await;
/// println!("Active calls: {}", stats.live_calls);
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct CallCenterEngine {
    pub(super) config: CallCenterConfig,
    pub(super) registry: CallRegistry,
    pub(super) adapter: Arc<CallControlAdapter>,
    pub(super) notifier: NotificationHub,
    pub(super) dialer: DialerService,
    pub(super) inbound: InboundRouter,
    pub(super) contacts: Arc<dyn ContactStore>,
    pub(super) agents: Arc<dyn AgentDirectory>,
    pub(super) db_manager: Option<Arc<DatabaseManager>>,
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(super) started: AtomicBool,
}

/// Engine-wide statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CallCenterStats {
    pub live_calls: usize,
    pub registry: RegistryStats,
    pub campaigns: Vec<CampaignStats>,
    pub routing: RouterStats,
    pub notifications: NotificationStats,
    pub adapter: AdapterStats,
}

impl CallCenterEngine {
    pub fn builder() -> CallCenterEngineBuilder {
        CallCenterEngineBuilder::new()
    }

    /// Recover mirrored calls and launch background tasks
    ///
    /// Sessions reloaded from the durable mirror that are already past their liveness
    /// bounds are swept immediately. Calling `start` twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Engine already started");
            return Ok(());
        }
        info!("🚀 Starting call center engine ({})", self.config.general.instance_id);

        let recovered = self.registry.recover_from_store().await?;
        if recovered > 0 {
            let swept = self.registry.sweep_stalled(&self.config.call).await;
            info!("♻️ Recovered {} calls, {} already past their bounds", recovered, swept.len());
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(
            self.registry
                .spawn_sweeper(self.config.call.clone(), self.shutdown_tx.subscribe()),
        );
        tasks.push(self.dialer.spawn_event_pump(self.shutdown_tx.subscribe()));
        tasks.push(self.spawn_notification_pump());

        info!("✅ Call center engine started");
        Ok(())
    }

    /// Forward `Ended` lifecycle events to the notification hub
    fn spawn_notification_pump(&self) -> JoinHandle<()> {
        let mut events = self.registry.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = events.recv() => match received {
                        Ok(CallLifecycleEvent::Ended(session)) => {
                            notifier.notify_ended(&session);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("⚠️ Notification pump lagged, {} call events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("Notification pump stopping");
        })
    }

    /// Stop every campaign loop and background task
    ///
    /// Campaign statuses are left as they are; in-flight calls keep their sessions.
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down call center engine");
        let _ = self.shutdown_tx.send(true);
        self.dialer.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await.is_err() {
                warn!("⚠️ Background task did not stop within {:?}", TASK_JOIN_TIMEOUT);
            }
        }
        self.started.store(false, Ordering::SeqCst);
    }

    pub async fn get_stats(&self) -> CallCenterStats {
        let registry = self.registry.stats();
        CallCenterStats {
            live_calls: registry.live,
            registry,
            campaigns: self.dialer.stats().await,
            routing: self.inbound.stats(),
            notifications: self.notifier.stats(),
            adapter: self.adapter.stats(),
        }
    }

    pub fn config(&self) -> &CallCenterConfig {
        &self.config
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub fn adapter(&self) -> &Arc<CallControlAdapter> {
        &self.adapter
    }

    pub fn notifier(&self) -> &NotificationHub {
        &self.notifier
    }

    pub fn dialer(&self) -> &DialerService {
        &self.dialer
    }

    pub fn inbound(&self) -> &InboundRouter {
        &self.inbound
    }

    pub fn contacts(&self) -> &Arc<dyn ContactStore> {
        &self.contacts
    }

    pub fn agents(&self) -> &Arc<dyn AgentDirectory> {
        &self.agents
    }

    /// SQLite mirror, when one is configured
    pub fn database_manager(&self) -> Option<&Arc<DatabaseManager>> {
        self.db_manager.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
