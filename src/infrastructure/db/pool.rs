use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tracing::log::LevelFilter;
use tracing::{info, warn};

use crate::config::env::redact_url;
use crate::config::settings::PoolSettings;

pub type DbPool = Pool<Postgres>;

const APPLICATION_NAME: &str = "rendition-worker";

/// Opens the pool, retrying while the server is unreachable. Configuration
/// and authentication errors fail on the first attempt.
pub async fn connect_to_db(connection_string: &str, settings: &PoolSettings) -> Result<DbPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(connection_string)?
        .application_name(APPLICATION_NAME)
        .log_statements(LevelFilter::Debug);
    let target = redact_url(connection_string);

    let mut attempt = 1;
    loop {
        let connected = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options.clone())
            .await;

        match connected {
            Ok(pool) => {
                info!(%target, max_connections = settings.max_connections, "✅ Connected to PostgreSQL");
                return Ok(pool);
            }
            Err(e) if attempt < settings.connect_attempts && is_transient(&e) => {
                let delay = backoff(attempt);
                warn!(%target, attempt, ?delay, "PostgreSQL unreachable, retrying: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// 500ms doubling per attempt, capped at 8s.
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 << attempt.clamp(1, 5))
}
