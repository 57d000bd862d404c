use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::env::{self, EnvKey};
use crate::config::keys::KeyRing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" | "minio" => Ok(StorageBackend::S3),
            other => Err(ConfigError::Invalid {
                key: EnvKey::StorageDevice.as_str(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Sizing for the document store pool. One job runs at a time per worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub connect_attempts: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            connect_attempts: 5,
        }
    }
}

impl PoolSettings {
    fn from_env() -> Self {
        let defaults = Self::default();
        let max_connections = env::get_parsed(EnvKey::DbMaxConnections, defaults.max_connections).max(1);
        Self {
            max_connections,
            min_connections: defaults.min_connections.min(max_connections),
            connect_attempts: env::get_parsed(EnvKey::DbConnectAttempts, defaults.connect_attempts).max(1),
            ..defaults
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub db_pool: PoolSettings,
    pub redis_url: String,
    pub redis_namespace: String,
    pub amqp_url: String,
    pub queue_name: String,
    pub storage_backend: StorageBackend,
    pub storage_root: String,
    pub s3: Option<S3Config>,
    pub workspace_root: PathBuf,
    pub workspace_keep: bool,
    pub public_endpoint: String,
    pub lease_ttl: Duration,
    pub job_timeout: Duration,
    pub keys: KeyRing,
}

fn required(key: EnvKey) -> Result<String, ConfigError> {
    let name = key.as_str();
    env::get(key).map_err(|_| ConfigError::Missing(name))
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let storage_backend: StorageBackend =
            env::get_or(EnvKey::StorageDevice, "local").parse()?;

        let s3 = match storage_backend {
            StorageBackend::Local => None,
            StorageBackend::S3 => Some(S3Config {
                endpoint: required(EnvKey::MinioUrl)?,
                bucket: required(EnvKey::MinioBucket)?,
                access_key: required(EnvKey::MinioAccessKey)?,
                secret_key: required(EnvKey::MinioSecretKey)?,
            }),
        };

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: required(EnvKey::DatabaseUrl)?,
            db_pool: PoolSettings::from_env(),
            redis_url: required(EnvKey::RedisUrl)?,
            redis_namespace: env::get_or(EnvKey::RedisNamespace, ""),
            amqp_url: required(EnvKey::AmqpUrl)?,
            queue_name: env::get_or(EnvKey::TranscodingQueue, "v1-transcoding"),
            storage_backend,
            storage_root: env::get_or(EnvKey::StorageRoot, "/storage"),
            s3,
            workspace_root: PathBuf::from(env::get_or(EnvKey::WorkspaceRoot, "/tmp/transcoding")),
            workspace_keep: env::get_flag(EnvKey::WorkspaceKeep),
            public_endpoint: env::get_or(EnvKey::PublicEndpoint, "http://127.0.0.1"),
            lease_ttl: Duration::from_secs(env::get_parsed(EnvKey::LeaseTtlSecs, 7200)),
            job_timeout: Duration::from_secs(env::get_parsed(EnvKey::JobTimeoutSecs, 3600)),
            keys: KeyRing::from_env(),
        })
    }

    /// Root of the tenant's uploaded files, relative to the storage backend.
    pub fn files_root(&self, project_id: &str) -> String {
        format!("{}/uploads/app-{}", self.storage_root.trim_end_matches('/'), project_id)
    }

    /// Root of the tenant's published renditions.
    pub fn videos_root(&self, project_id: &str) -> String {
        format!("{}/videos/app-{}", self.storage_root.trim_end_matches('/'), project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!("minio".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert!("ftp".parse::<StorageBackend>().is_err());
    }
}
