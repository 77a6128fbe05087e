//! The event bus (component C): an at-least-once queue of `post_created`
//! events, backed by a PostgreSQL table rather than an external broker so
//! the workspace stays self-contained. Visibility timeout, receipt
//! handles, and dead-lettering after too many receives give it the same
//! contract as a managed SQS-style queue.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use timeline_core::error::{ServiceError, ServiceResult};
use uuid::Uuid;

/// A claimed message. `receipt_handle` identifies *this* delivery attempt;
/// it changes on redelivery, so acking with a stale handle is a no-op.
#[derive(Debug, Clone)]
pub struct Message {
    pub receipt_handle: Uuid,
    pub payload: serde_json::Value,
    pub receive_count: i32,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, payload: serde_json::Value) -> ServiceResult<()>;

    /// Long-polls for up to `wait_secs`, returning as soon as at least one
    /// message is claimable or the wait elapses. Never returns more than
    /// `max_count` messages.
    async fn receive(&self, max_count: i64, wait_secs: u64) -> ServiceResult<Vec<Message>>;

    async fn ack(&self, receipt_handle: Uuid) -> ServiceResult<()>;

    async fn is_healthy(&self) -> bool;
}

#[derive(Clone)]
pub struct PgEventBus {
    pool: PgPool,
    visibility_timeout_secs: i64,
    max_receives: i32,
    publish_max_attempts: u32,
}

impl PgEventBus {
    pub async fn connect(
        database_url: &str,
        visibility_timeout_secs: i64,
        max_receives: i32,
        publish_max_attempts: u32,
    ) -> ServiceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("failed to connect to bus database: {e}")))?;
        Ok(Self {
            pool,
            visibility_timeout_secs,
            max_receives,
            publish_max_attempts,
        })
    }

    /// Reuses an already-open pool — the service and the worker may point
    /// the bus at the same database as the durable store.
    pub fn from_pool(
        pool: PgPool,
        visibility_timeout_secs: i64,
        max_receives: i32,
        publish_max_attempts: u32,
    ) -> Self {
        Self {
            pool,
            visibility_timeout_secs,
            max_receives,
            publish_max_attempts,
        }
    }

    pub async fn migrate(&self) -> ServiceResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(format!("bus migration failed: {e}")))?;
        Ok(())
    }

    async fn claim_batch(&self, max_count: i64) -> ServiceResult<Vec<Message>> {
        let mut tx = self.pool.begin().await?;

        let candidates = sqlx::query(
            r#"
            SELECT id, payload, receive_count
            FROM bus_events
            WHERE status = 'pending' OR (status = 'in_flight' AND visible_at <= now())
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(max_count)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for row in candidates {
            let id: i64 = row.get("id");
            let payload: serde_json::Value = row.get("payload");
            let receive_count: i32 = row.get("receive_count");
            let next_receive_count = receive_count + 1;

            if next_receive_count > self.max_receives {
                sqlx::query(
                    r#"
                    INSERT INTO dead_letter_events (id, payload, receive_count, created_at)
                    SELECT id, payload, $2, created_at FROM bus_events WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(receive_count)
                .execute(&mut *tx)
                .await?;
                sqlx::query("DELETE FROM bus_events WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tracing::warn!(event_id = id, receive_count, "dead-lettered event");
                continue;
            }

            let receipt_handle = Uuid::new_v4();
            sqlx::query(
                r#"
                UPDATE bus_events
                SET status = 'in_flight',
                    receive_count = $2,
                    visible_at = now() + ($3 || ' seconds')::interval,
                    receipt_handle = $4
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(next_receive_count)
            .bind(self.visibility_timeout_secs.to_string())
            .bind(receipt_handle)
            .execute(&mut *tx)
            .await?;

            claimed.push(Message {
                receipt_handle,
                payload,
                receive_count: next_receive_count,
            });
        }

        tx.commit().await?;
        Ok(claimed)
    }
}

#[async_trait]
impl EventBus for PgEventBus {
    async fn publish(&self, payload: serde_json::Value) -> ServiceResult<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match sqlx::query("INSERT INTO bus_events (payload) VALUES ($1)")
                .bind(&payload)
                .execute(&self.pool)
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) if attempt < self.publish_max_attempts => {
                    tracing::warn!(attempt, error = %err, "publish attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(attempt - 1))).await;
                }
                Err(err) => {
                    return Err(ServiceError::Unavailable(format!(
                        "publish failed after {attempt} attempts: {err}"
                    )))
                }
            }
        }
    }

    async fn receive(&self, max_count: i64, wait_secs: u64) -> ServiceResult<Vec<Message>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_secs);
        loop {
            let claimed = self.claim_batch(max_count).await?;
            if !claimed.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(claimed);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn ack(&self, receipt_handle: Uuid) -> ServiceResult<()> {
        sqlx::query("DELETE FROM bus_events WHERE receipt_handle = $1")
            .bind(receipt_handle)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
