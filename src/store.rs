// store.rs — persistent key-value layer (spec.md §6 "Persisted state
// layout"). A single typed wrapper over one `redis::Client`, following the
// teacher's `publisher.rs` pattern of holding one `redis::Client` and
// calling `get_async_connection()` per operation rather than pooling
// connections by hand.
use crate::error::StoreError;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const MAPPING_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const DELTA_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
const JOURNAL_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
const LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Store {
    client: redis::Client,
}

impl Store {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self { client: redis::Client::open(redis_url)? })
    }

    async fn conn(&self) -> Result<redis::aio::Connection, StoreError> {
        Ok(self.client.get_async_connection().await?)
    }

    pub fn mapping_ttl() -> Duration {
        MAPPING_TTL
    }

    pub fn delta_ttl() -> Duration {
        DELTA_TTL
    }

    pub fn journal_ttl() -> Duration {
        JOURNAL_TTL
    }

    pub fn lock_ttl() -> Duration {
        LOCK_TTL
    }

    /// Reads and JSON-decodes a key. Returns `Ok(None)` if absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut con = self.conn().await?;
        let raw: Option<String> = con.get(key).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// JSON-encodes and writes a key with the given TTL.
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        let payload = serde_json::to_string(value)?;
        let _: () = con.set_ex(key, payload, ttl.as_secs()).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        let _: () = con.del(key).await?;
        Ok(())
    }

    pub async fn del_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut con = self.conn().await?;
        let _: () = con.del(keys).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.conn().await?;
        Ok(con.exists(key).await?)
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        let _: () = con.sadd(key, member).await?;
        Ok(())
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        let _: () = con.srem(key, member).await?;
        Ok(())
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.conn().await?;
        Ok(con.smembers(key).await?)
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.conn().await?;
        Ok(con.get(key).await?)
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        let _: () = con.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    /// Acquires the short-lived per-oid lock via `SET key value NX PX ttl`.
    /// Returns true if the lock was acquired, false if another holder has it.
    pub async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut con = self.conn().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut con)
            .await?;
        Ok(result.is_some())
    }

    /// Releases the lock only if we still hold it (token matches), to avoid
    /// releasing a lock another process re-acquired after TTL expiry.
    pub async fn unlock(&self, key: &str, token: &str) -> Result<(), StoreError> {
        let mut con = self.conn().await?;
        let held: Option<String> = con.get(key).await?;
        if held.as_deref() == Some(token) {
            let _: () = con.del(key).await?;
        }
        Ok(())
    }
}
