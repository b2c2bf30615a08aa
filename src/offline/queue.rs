use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::{auth::new_id, errors::BookingError};

/// After this many failed submissions an item stops retrying silently and
/// waits for manual resolution.
pub const RETRY_CEILING: i64 = 5;

/// The booking payload a device can assemble without talking to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkInPayload {
    pub worker_id: String,
    pub service_ids: Vec<String>,
    pub scheduled_start: String,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItemStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Syncing => "syncing",
            QueueItemStatus::Synced => "synced",
            QueueItemStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self, BookingError> {
        match value {
            "pending" => Ok(QueueItemStatus::Pending),
            "syncing" => Ok(QueueItemStatus::Syncing),
            "synced" => Ok(QueueItemStatus::Synced),
            "failed" => Ok(QueueItemStatus::Failed),
            other => Err(BookingError::Sync(format!(
                "unknown queue item status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub local_id: String,
    pub payload: WalkInPayload,
    pub status: QueueItemStatus,
    pub retry_count: i64,
    pub appointment_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    local_id: String,
    payload: String,
    status: String,
    retry_count: i64,
    appointment_id: Option<String>,
    created_at: String,
}

impl QueueRow {
    fn into_item(self) -> Result<QueueItem, BookingError> {
        let payload: WalkInPayload = serde_json::from_str(&self.payload)
            .map_err(|err| BookingError::Sync(format!("corrupt queue payload: {err}")))?;
        Ok(QueueItem {
            local_id: self.local_id,
            payload,
            status: QueueItemStatus::parse(&self.status)?,
            retry_count: self.retry_count,
            appointment_id: self.appointment_id,
            created_at: self.created_at,
        })
    }
}

/// Durable local queue, private to one device. The table is created at open
/// time because a field device does not carry the server's migration set.
#[derive(Clone)]
pub struct WalkInQueue {
    pool: SqlitePool,
    device_id: String,
}

impl WalkInQueue {
    pub async fn open(db_url: &str, device_id: &str) -> Result<Self, BookingError> {
        crate::db::ensure_sqlite_dir(db_url)
            .map_err(|err| BookingError::Sync(format!("queue storage unavailable: {err}")))?;
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS walkin_queue (
                local_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                appointment_id TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&pool)
        .await?;

        // A crash between mark_syncing and its outcome leaves rows stuck in
        // 'syncing', invisible to both retry and manual resolution. Reset
        // them here; the idempotency key makes the replay safe.
        sqlx::query("UPDATE walkin_queue SET status = 'pending' WHERE status = 'syncing'")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            device_id: device_id.to_string(),
        })
    }

    /// The idempotency key the server sees for an item. Stable across
    /// retries, unique across devices.
    pub fn idempotency_key(&self, local_id: &str) -> String {
        format!("{}:{}", self.device_id, local_id)
    }

    /// Durably capture a walk-in. This is the only step that may surface a
    /// storage failure to the user; everything after it is recoverable.
    pub async fn enqueue(&self, payload: &WalkInPayload) -> Result<QueueItem, BookingError> {
        let local_id = new_id();
        let created_at = Utc::now().to_rfc3339();
        let encoded = serde_json::to_string(payload)
            .map_err(|err| BookingError::Sync(format!("payload encode failed: {err}")))?;

        sqlx::query(
            r#"INSERT INTO walkin_queue (local_id, payload, status, retry_count, appointment_id, created_at)
               VALUES (?, ?, 'pending', 0, NULL, ?)"#,
        )
        .bind(&local_id)
        .bind(&encoded)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(QueueItem {
            local_id,
            payload: payload.clone(),
            status: QueueItemStatus::Pending,
            retry_count: 0,
            appointment_id: None,
            created_at,
        })
    }

    /// Items eligible for the next sync pass, oldest first.
    pub async fn retryable_items(&self) -> Result<Vec<QueueItem>, BookingError> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"SELECT local_id, payload, status, retry_count, appointment_id, created_at
               FROM walkin_queue
               WHERE status IN ('pending', 'failed') AND retry_count < ?
               ORDER BY created_at"#,
        )
        .bind(RETRY_CEILING)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueueRow::into_item).collect()
    }

    /// Items past the retry ceiling, surfaced for manual resolution.
    pub async fn failed_items(&self) -> Result<Vec<QueueItem>, BookingError> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"SELECT local_id, payload, status, retry_count, appointment_id, created_at
               FROM walkin_queue
               WHERE status = 'failed' AND retry_count >= ?
               ORDER BY created_at"#,
        )
        .bind(RETRY_CEILING)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueueRow::into_item).collect()
    }

    pub async fn len(&self) -> Result<i64, BookingError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM walkin_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool, BookingError> {
        Ok(self.len().await? == 0)
    }

    pub async fn mark_syncing(&self, local_id: &str) -> Result<(), BookingError> {
        sqlx::query("UPDATE walkin_queue SET status = 'syncing' WHERE local_id = ?")
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Confirmed server write: record the server id, then drop the item.
    pub async fn mark_synced(
        &self,
        local_id: &str,
        appointment_id: &str,
    ) -> Result<(), BookingError> {
        sqlx::query(
            "UPDATE walkin_queue SET status = 'synced', appointment_id = ? WHERE local_id = ?",
        )
        .bind(appointment_id)
        .bind(local_id)
        .execute(&self.pool)
        .await?;
        sqlx::query("DELETE FROM walkin_queue WHERE local_id = ?")
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, local_id: &str) -> Result<(), BookingError> {
        sqlx::query(
            "UPDATE walkin_queue SET status = 'failed', retry_count = retry_count + 1 WHERE local_id = ?",
        )
        .bind(local_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Push an item straight past the retry ceiling; used when replaying
    /// it can never succeed.
    pub async fn mark_exhausted(&self, local_id: &str) -> Result<(), BookingError> {
        sqlx::query(
            "UPDATE walkin_queue SET status = 'failed', retry_count = MAX(retry_count, ?) WHERE local_id = ?",
        )
        .bind(RETRY_CEILING)
        .bind(local_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Manual resolution path: drop an item the user has given up on.
    pub async fn discard(&self, local_id: &str) -> Result<(), BookingError> {
        sqlx::query("DELETE FROM walkin_queue WHERE local_id = ?")
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
