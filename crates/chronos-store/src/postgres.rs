//! Postgres implementation of [`crate::Store`].

use std::time::Duration;

use async_trait::async_trait;
use chronos_common::{Notification, RetryPolicy, Status};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{NotificationSummary, Store, StoreError};

/// Per-status-family retention windows (design note: cleanup is a single
/// multi-clause `DELETE`, not three separate statements).
#[derive(Debug, Clone, Copy)]
pub struct RetentionWindows {
    pub canceled: Duration,
    pub completed: Duration,
    pub failed: Duration,
}

impl Default for RetentionWindows {
    fn default() -> Self {
        Self {
            canceled: Duration::from_secs(7 * 24 * 3600),
            completed: Duration::from_secs(30 * 24 * 3600),
            failed: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

pub struct PostgresStore {
    pool: PgPool,
    retry: RetryPolicy,
    recover_limit: u32,
    retention: RetentionWindows,
}

impl PostgresStore {
    pub async fn connect(
        dsn: &str,
        max_connections: u32,
        retry: RetryPolicy,
        recover_limit: u32,
        retention: RetentionWindows,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool, retry, recover_limit, retention))
    }

    pub fn new(pool: PgPool, retry: RetryPolicy, recover_limit: u32, retention: RetentionWindows) -> Self {
        Self {
            pool,
            retry,
            recover_limit,
            retention,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `notifications`/`recipients` tables if they do not
    /// already exist. Connection bring-up/migration tooling beyond this
    /// is out of scope.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                channel TEXT NOT NULL,
                subject TEXT,
                message TEXT NOT NULL,
                status TEXT NOT NULL,
                send_at TIMESTAMPTZ NOT NULL,
                send_at_local TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recipients (
                notification_id TEXT NOT NULL REFERENCES notifications(id) ON DELETE CASCADE,
                recipient TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_status_send_at ON notifications(status, send_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_recipients_notification_id ON recipients(notification_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create(&self, notification: &Notification) -> Result<(), StoreError> {
        self.retry
            .run(|| async {
                let mut tx = self.pool.begin().await?;

                sqlx::query(
                    r#"
                    INSERT INTO notifications
                        (id, channel, subject, message, status, send_at, send_at_local, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(notification.id.to_string())
                .bind(notification.channel.to_string())
                .bind(&notification.subject)
                .bind(&notification.message)
                .bind(notification.status.as_wire_str())
                .bind(notification.send_at)
                .bind(&notification.send_at_local)
                .bind(notification.updated_at)
                .execute(&mut *tx)
                .await?;

                for recipient in &notification.recipients {
                    sqlx::query(
                        "INSERT INTO recipients (notification_id, recipient) VALUES ($1, $2)",
                    )
                    .bind(notification.id.to_string())
                    .bind(recipient)
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                Ok::<_, sqlx::Error>(())
            })
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    StoreError::AlreadyExists
                }
                _ => StoreError::Database(e),
            })
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = self
            .retry
            .run(|| async {
                sqlx::query("DELETE FROM notifications WHERE id = $1")
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await
            })
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_status(&self, id: Uuid) -> Result<Status, StoreError> {
        let row = self
            .retry
            .run(|| async {
                sqlx::query("SELECT status FROM notifications WHERE id = $1")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;

        let row = row.ok_or(StoreError::NotFound)?;
        let raw: String = row.try_get("status")?;
        raw.parse().map_err(|_| StoreError::NotFound)
    }

    async fn set_status(&self, id: Uuid, new_status: Status) -> Result<(), StoreError> {
        let result = if new_status == Status::Canceled {
            self.retry
                .run(|| async {
                    sqlx::query(
                        r#"
                        UPDATE notifications
                        SET status = $1, updated_at = NOW()
                        WHERE id = $2 AND status IN ($3, $4)
                        "#,
                    )
                    .bind(new_status.as_wire_str())
                    .bind(id.to_string())
                    .bind(Status::Pending.as_wire_str())
                    .bind(Status::Late.as_wire_str())
                    .execute(&self.pool)
                    .await
                })
                .await?
        } else {
            self.retry
                .run(|| async {
                    sqlx::query("UPDATE notifications SET status = $1, updated_at = NOW() WHERE id = $2")
                        .bind(new_status.as_wire_str())
                        .bind(id.to_string())
                        .execute(&self.pool)
                        .await
                })
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(if new_status == Status::Canceled {
                StoreError::CannotCancel
            } else {
                StoreError::NotFound
            });
        }
        Ok(())
    }

    async fn get_all_statuses(&self) -> Result<Vec<NotificationSummary>, StoreError> {
        let rows = self
            .retry
            .run(|| async {
                sqlx::query("SELECT id, send_at, status FROM notifications ORDER BY send_at ASC")
                    .fetch_all(&self.pool)
                    .await
            })
            .await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let send_at = row.try_get("send_at")?;
                let status: String = row.try_get("status")?;
                Ok(NotificationSummary {
                    id: Uuid::parse_str(&id).map_err(|e| {
                        StoreError::Invalid(format!("stored id is not a valid uuid: {e}"))
                    })?,
                    send_at,
                    status: status
                        .parse()
                        .map_err(|_| StoreError::Invalid(format!("unknown status {status}")))?,
                })
            })
            .collect()
    }

    async fn mark_lates(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = self
            .retry
            .run(|| async {
                sqlx::query(
                    r#"
                    UPDATE notifications
                    SET status = $1, updated_at = NOW()
                    WHERE status = $2 AND send_at < NOW()
                    RETURNING id
                    "#,
                )
                .bind(Status::Late.as_wire_str())
                .bind(Status::Pending.as_wire_str())
                .fetch_all(&self.pool)
                .await
            })
            .await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                Uuid::parse_str(&id)
                    .map_err(|e| StoreError::Invalid(format!("stored id is not a valid uuid: {e}")))
            })
            .collect()
    }

    async fn recover(&self, limit: u32) -> Result<Vec<Notification>, StoreError> {
        let limit = if limit == 0 { self.recover_limit } else { limit };

        let rows = self
            .retry
            .run(|| async {
                sqlx::query(
                    r#"
                    SELECT id, channel, subject, message, status, send_at, send_at_local, updated_at
                    FROM notifications
                    WHERE status = $1 OR status = $2
                    ORDER BY send_at ASC
                    LIMIT $3
                    "#,
                )
                .bind(Status::Pending.as_wire_str())
                .bind(Status::Late.as_wire_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
            })
            .await?;

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            let id_str: String = row.try_get("id")?;
            let id = Uuid::parse_str(&id_str)
                .map_err(|e| StoreError::Invalid(format!("stored id is not a valid uuid: {e}")))?;
            let channel_str: String = row.try_get("channel")?;
            let status_str: String = row.try_get("status")?;

            let recipient_rows = sqlx::query("SELECT recipient FROM recipients WHERE notification_id = $1")
                .bind(&id_str)
                .fetch_all(&self.pool)
                .await?;
            let recipients = recipient_rows
                .into_iter()
                .map(|r| r.try_get::<String, _>("recipient"))
                .collect::<Result<Vec<_>, _>>()?;

            notifications.push(Notification {
                id,
                channel: channel_str
                    .parse()
                    .map_err(|_| StoreError::Invalid(format!("unknown channel {channel_str}")))?,
                subject: row.try_get("subject")?,
                message: row.try_get("message")?,
                status: status_str
                    .parse()
                    .map_err(|_| StoreError::Invalid(format!("unknown status {status_str}")))?,
                send_at: row.try_get("send_at")?,
                send_at_local: row.try_get("send_at_local")?,
                recipients,
                updated_at: row.try_get("updated_at")?,
            });
        }

        Ok(notifications)
    }

    async fn cleanup(&self) -> Result<u64, StoreError> {
        let result = self
            .retry
            .run(|| async {
                sqlx::query(
                    r#"
                    DELETE FROM notifications
                    WHERE (status = $1 AND updated_at < NOW() - $2 * INTERVAL '1 second')
                       OR (status = $3 AND updated_at < NOW() - $4 * INTERVAL '1 second')
                       OR (status IN ($5, $6) AND updated_at < NOW() - $7 * INTERVAL '1 second')
                    "#,
                )
                .bind(Status::Canceled.as_wire_str())
                .bind(self.retention.canceled.as_secs() as f64)
                .bind(Status::Sent.as_wire_str())
                .bind(self.retention.completed.as_secs() as f64)
                .bind(Status::Failed.as_wire_str())
                .bind(Status::FailedToSendInTime.as_wire_str())
                .bind(self.retention.failed.as_secs() as f64)
                .execute(&self.pool)
                .await
            })
            .await?;

        Ok(result.rows_affected())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_windows_default_matches_documented_values() {
        let retention = RetentionWindows::default();
        assert_eq!(retention.canceled, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(retention.completed, Duration::from_secs(30 * 24 * 3600));
        assert_eq!(retention.failed, Duration::from_secs(30 * 24 * 3600));
    }
}
