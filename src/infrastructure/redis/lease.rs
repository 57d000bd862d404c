//! Exclusive per-rendition leases.
//!
//! A lease guards one (project, video, profile) triple for the duration of a
//! job so two workers never produce the same rendition concurrently. Leases
//! expire on their own if the holder dies.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::client::RedisService;

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock state poisoned")]
    Poisoned,
}

/// Proof of holding a lease. Only the matching token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: String,
}

impl Lease {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            token: Uuid::new_v4().simple().to_string(),
        }
    }
}

pub fn rendition_key(project: &str, video_id: &str, profile_id: &str) -> String {
    format!("rendition-lease:{}:{}:{}", project, video_id, profile_id)
}

#[async_trait]
pub trait RenditionLock: Send + Sync {
    /// Returns `None` when another holder owns the key.
    async fn acquire(&self, key: &str, ttl: Duration) -> LockResult<Option<Lease>>;

    /// Releases the lease if it is still held by this token.
    async fn release(&self, lease: &Lease) -> LockResult<bool>;
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLease {
    redis: RedisService,
}

impl RedisLease {
    pub fn new(redis: RedisService) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl RenditionLock for RedisLease {
    async fn acquire(&self, key: &str, ttl: Duration) -> LockResult<Option<Lease>> {
        let lease = Lease::new(key);
        let mut conn = self.redis.get_conn().await?;

        let reply: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
            .arg(self.redis.key(&lease.key))
            .arg(&lease.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.redis.discard_on(&e).await;
                return Err(e.into());
            }
        };

        match reply {
            Some(_) => {
                debug!(key = %key, "Lease acquired");
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    async fn release(&self, lease: &Lease) -> LockResult<bool> {
        let mut conn = self.redis.get_conn().await?;
        let deleted: i64 = match redis::Script::new(RELEASE_SCRIPT)
            .key(self.redis.key(&lease.key))
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                self.redis.discard_on(&e).await;
                return Err(e.into());
            }
        };

        if deleted == 0 {
            warn!(key = %lease.key, "Lease already expired or taken over");
        }
        Ok(deleted > 0)
    }
}

/// In-process lease table for single-worker deployments and tests.
#[derive(Debug, Default)]
pub struct LocalLease {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl LocalLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RenditionLock for LocalLease {
    async fn acquire(&self, key: &str, ttl: Duration) -> LockResult<Option<Lease>> {
        let mut held = self.held.lock().map_err(|_| LockError::Poisoned)?;
        let now = Instant::now();

        if let Some((_, expires_at)) = held.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let lease = Lease::new(key);
        held.insert(key.to_string(), (lease.token.clone(), now + ttl));
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> LockResult<bool> {
        let mut held = self.held.lock().map_err(|_| LockError::Poisoned)?;
        let owned = held
            .get(&lease.key)
            .is_some_and(|(token, _)| *token == lease.token);

        if owned {
            held.remove(&lease.key);
        }
        Ok(owned)
    }
}
