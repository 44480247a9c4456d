//! Redis-backed implementation of [`crate::Cache`], following the same
//! `redis::aio::ConnectionManager` usage pattern used elsewhere in this
//! codebase for talking to Redis.

use std::str::FromStr;
use std::time::Duration;

use chronos_common::{RetryPolicy, Status};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::{Cache, CacheError};

pub struct RedisCache {
    conn: ConnectionManager,
    ttl: Duration,
    key_prefix: String,
    retry: RetryPolicy,
}

impl RedisCache {
    pub async fn connect(
        url: &str,
        ttl: Duration,
        key_prefix: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            ttl,
            key_prefix: key_prefix.into(),
            retry,
        })
    }

    fn key(&self, id: Uuid) -> String {
        format!("{}:{}", self.key_prefix, id)
    }
}

#[async_trait::async_trait]
impl Cache for RedisCache {
    async fn get_status(&self, id: Uuid) -> Result<Option<Status>, CacheError> {
        let mut conn = self.conn.clone();
        let key = self.key(id);

        let raw: Option<String> = conn.get(&key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let ttl_secs = self.ttl.as_secs().max(1) as i64;
        let _: () = conn.expire(&key, ttl_secs).await?;

        match Status::from_str(&raw) {
            Ok(status) => Ok(Some(status)),
            Err(_) => Err(CacheError::Corrupt(raw)),
        }
    }

    async fn set_status(&self, id: Uuid, status: Status) -> Result<(), CacheError> {
        let key = self.key(id);
        let ttl_secs = self.ttl.as_secs().max(1) as i64;

        self.retry
            .run(|| {
                let mut conn = self.conn.clone();
                let key = key.clone();
                let value = status.as_wire_str();
                async move {
                    let _: () = conn.set_ex(&key, value, ttl_secs as u64).await?;
                    Ok::<_, redis::RedisError>(())
                }
            })
            .await?;

        Ok(())
    }

    async fn mark_lates(&self, ids: &[Uuid]) -> Result<(), CacheError> {
        for &id in ids {
            self.set_status(id, Status::Late).await?;
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}
