//! Shared KV store client.
//!
//! Every component of the worker talks to the same KV store: distributed
//! leases, suppression keys, the job-settings cache, and the two FIFO queues
//! (`job_queue` for immediate runs, `alert_queue` for dispatch). All writes
//! are set-if-absent, set-with-TTL, or atomic increment, so horizontally
//! scaled workers never need cross-key coordination.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::StoreError;

/// Atomic INCR + EXPIRE in a single round trip. The TTL is refreshed on
/// every increment so a window counter never outlives its bucket.
fn incr_with_ttl_script() -> Script {
    Script::new(
        r"
        local count = redis.call('INCR', KEYS[1])
        redis.call('EXPIRE', KEYS[1], ARGV[1])
        return count
        ",
    )
}

/// Async KV store handle. Cheap to clone; all clones share one multiplexed
/// connection.
#[derive(Clone)]
pub struct Kv {
    conn: ConnectionManager,
}

impl std::fmt::Debug for Kv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kv").finish_non_exhaustive()
    }
}

impl Kv {
    /// Connect to the KV store.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!("Connected to KV store");
        Ok(Self { conn })
    }

    /// Get a string value.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    /// Set a value without expiration.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    /// Set a value with an expiration.
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    /// Atomic set-if-absent with expiration (`SET NX EX`). Returns whether
    /// the key was claimed by this call.
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(outcome.is_some())
    }

    /// Check key existence.
    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Atomically increment a counter and refresh its TTL. Returns the
    /// post-increment value.
    pub async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count = incr_with_ttl_script()
            .key(key)
            .arg(ttl.as_secs())
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(count)
    }

    /// Read a counter value. A missing key reads as zero.
    pub async fn get_count(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    /// Remaining TTL of a key in seconds (-1 no expiry, -2 missing).
    pub async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.ttl(key).await?)
    }

    /// Read a JSON-encoded value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a JSON-encoded value with an expiration.
    pub async fn set_json_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set_with_ttl(key, &raw, ttl).await
    }

    /// Push a payload onto the head of a FIFO queue.
    pub async fn push(&self, queue: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(queue, payload).await?;
        Ok(())
    }

    /// Pop from the tail of a FIFO queue without blocking.
    pub async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.rpop(queue, None).await?)
    }

    /// Pop from the tail of a FIFO queue, blocking up to `timeout`.
    pub async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let entry: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(timeout.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(entry.map(|(_, payload)| payload))
    }

    /// Write multiple fields of a hash.
    pub async fn put_hash(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }
}
