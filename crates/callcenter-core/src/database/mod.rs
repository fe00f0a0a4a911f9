//! # Database Management (sqlx + SQLite)
//!
//! SQLite backing for the two persistence seams of the call registry:
//!
//! - **live call mirror** ([`CallStore`]): every non-terminal session is written before
//!   the provider is asked to place it and on each state change, and read back on start
//!   to rebuild the live table after a crash
//! - **completed-call records** ([`CallRecordSink`]): one row per ended call, with the
//!   computed duration, for the reporting side
//!
//! Sessions and records are stored as JSON payloads next to a few indexed columns.
//!
//! ## Quick Start
//!
//! ```rust
//! use callcenter_core::database::DatabaseManager;
//!
//! # async fn example() -> callcenter_core::Result<()> {
//! let db = DatabaseManager::new_in_memory().await?;
//! assert_eq!(db.count_call_records().await?, 0);
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::call::{CallRecordSink, CallSession, CallStore, CompletedCallRecord};
use crate::config::DatabaseConfig;
use crate::error::{CallCenterError, Result};
use crate::ids::CallId;

/// SQLite-backed call mirror and record sink
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Connect and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("🗄️ Initializing database: {}", database_url);
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CallCenterError::configuration(format!("invalid database url {}: {}", database_url, e)))?
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // Every connection to `:memory:` is its own database, so keep exactly one alive
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| CallCenterError::database(format!("failed to connect to {}: {}", database_url, e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CallCenterError::database(format!("failed to run migrations: {}", e)))?;

        info!("✅ Database ready");
        Ok(Self { pool })
    }

    /// Private in-memory database, for tests
    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(&config.database_url).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn save_session(&self, session: &CallSession) -> Result<()> {
        let payload = serde_json::to_string(session)
            .map_err(|e| CallCenterError::database(format!("encoding call {}: {}", session.id, e)))?;

        sqlx::query(
            "INSERT INTO live_calls (call_id, provider_call_id, direction, status, campaign_id, payload, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(call_id) DO UPDATE SET
                provider_call_id = excluded.provider_call_id,
                status = excluded.status,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
        )
        .bind(session.id.as_str())
        .bind(session.provider_call_id.as_ref().map(|p| p.as_str()))
        .bind(session.direction.to_string())
        .bind(session.status.as_str())
        .bind(session.campaign_id.as_ref().map(|c| c.as_str()))
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("Mirrored call {} ({})", session.id, session.status);
        Ok(())
    }

    pub async fn remove_session(&self, call_id: &CallId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM live_calls WHERE call_id = ?")
            .bind(call_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn load_active_sessions(&self) -> Result<Vec<CallSession>> {
        let rows = sqlx::query("SELECT call_id, payload FROM live_calls ORDER BY updated_at")
            .fetch_all(&self.pool)
            .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let call_id: String = row.try_get("call_id")?;
            let payload: String = row.try_get("payload")?;
            match serde_json::from_str::<CallSession>(&payload) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("⚠️ Skipping unreadable mirrored call {}: {}", call_id, e),
            }
        }
        Ok(sessions)
    }

    pub async fn write_record(&self, record: &CompletedCallRecord) -> Result<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| CallCenterError::database(format!("encoding record {}: {}", record.call_id, e)))?;

        sqlx::query(
            "INSERT OR REPLACE INTO call_records
                (call_id, direction, phone_number, agent_id, contact_id, campaign_id, status,
                 end_reason, start_time, end_time, duration_secs, talk_time_secs, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.call_id.as_str())
        .bind(record.direction.to_string())
        .bind(&record.phone_number)
        .bind(record.agent_id.as_ref().map(|a| a.as_str()))
        .bind(record.contact_id.as_ref().map(|c| c.as_str()))
        .bind(record.campaign_id.as_ref().map(|c| c.as_str()))
        .bind(record.status.as_str())
        .bind(record.end_reason.as_ref().map(|r| r.as_str()))
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.duration_secs)
        .bind(record.talk_time_secs)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        debug!("📝 Stored call record {} ({}s)", record.call_id, record.duration_secs);
        Ok(())
    }

    /// Most recent records first
    pub async fn list_call_records(&self, limit: u32) -> Result<Vec<CompletedCallRecord>> {
        let rows = sqlx::query("SELECT payload FROM call_records ORDER BY end_time DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                serde_json::from_str(&payload)
                    .map_err(|e| CallCenterError::database(format!("decoding call record: {}", e)))
            })
            .collect()
    }

    pub async fn count_call_records(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM call_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn count_live_sessions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM live_calls")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[async_trait]
impl CallStore for DatabaseManager {
    async fn save(&self, session: &CallSession) -> Result<()> {
        self.save_session(session).await
    }

    async fn remove(&self, call_id: &CallId) -> Result<()> {
        self.remove_session(call_id).await.map(|_| ())
    }

    async fn load_active(&self) -> Result<Vec<CallSession>> {
        self.load_active_sessions().await
    }
}

#[async_trait]
impl CallRecordSink for DatabaseManager {
    async fn write_completed(&self, record: &CompletedCallRecord) -> Result<()> {
        self.write_record(record).await
    }
}
