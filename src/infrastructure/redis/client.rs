use std::sync::Arc;

use redis::{Client, RedisError, aio::MultiplexedConnection};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::env::redact_url;

/// Shared Redis handle. Keeps one multiplexed connection and scopes every
/// key under an optional namespace so several deployments can share a server.
#[derive(Clone)]
pub struct RedisService {
    client: Client,
    namespace: String,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisService {
    pub async fn new(connection_string: &str, namespace: &str) -> Result<Self, RedisError> {
        let client = Client::open(connection_string)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(target = %redact_url(connection_string), namespace, "✅ Connected to Redis");
        Ok(Self {
            client,
            namespace: namespace.trim_end_matches(':').to_string(),
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Returns the cached connection, opening a new one after [`Self::discard_on`]
    /// dropped it.
    pub async fn get_conn(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut cached = self.conn.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection when `error` means it is no longer usable.
    pub async fn discard_on(&self, error: &RedisError) {
        if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() {
            warn!("Redis connection lost: {}", error);
            self.conn.lock().await.take();
        }
    }

    pub fn key(&self, name: &str) -> String {
        namespaced(&self.namespace, name)
    }
}

fn namespaced(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}:{}", namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_keys() {
        assert_eq!(namespaced("", "rendition-lease:a:b:c"), "rendition-lease:a:b:c");
        assert_eq!(namespaced("staging", "rendition-lease:a:b:c"), "staging:rendition-lease:a:b:c");
    }
}
