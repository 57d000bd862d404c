use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RedisUrl,
    RedisNamespace,
    DbMaxConnections,
    DbConnectAttempts,
    AmqpUrl,
    TranscodingQueue,
    StorageDevice,
    StorageRoot,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    WorkspaceRoot,
    WorkspaceKeep,
    PublicEndpoint,
    LeaseTtlSecs,
    JobTimeoutSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::RedisNamespace => "REDIS_NAMESPACE",
            EnvKey::DbMaxConnections => "DB_MAX_CONNECTIONS",
            EnvKey::DbConnectAttempts => "DB_CONNECT_ATTEMPTS",
            EnvKey::AmqpUrl => "AMQP_URL",
            EnvKey::TranscodingQueue => "TRANSCODING_QUEUE",
            EnvKey::StorageDevice => "STORAGE_DEVICE",
            EnvKey::StorageRoot => "STORAGE_ROOT",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_VIDEOS",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::WorkspaceRoot => "WORKSPACE_ROOT",
            EnvKey::WorkspaceKeep => "WORKSPACE_KEEP",
            EnvKey::PublicEndpoint => "PUBLIC_ENDPOINT",
            EnvKey::LeaseTtlSecs => "LEASE_TTL_SECS",
            EnvKey::JobTimeoutSecs => "JOB_TIMEOUT_SECS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Accepts `1`, `true`, `yes` and `on` (any case) as set.
pub fn get_flag(key: EnvKey) -> bool {
    get(key).map(|val| parse_flag(&val)).unwrap_or(false)
}

pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Masks the userinfo part of a connection URL for logging.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}***{}", &url[..scheme_end + 3], &rest[at..]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://worker:s3cret@db:5432/media"),
            "postgres://***@db:5432/media"
        );
        assert_eq!(redact_url("redis://:pw@cache:6379/0"), "redis://***@cache:6379/0");
        assert_eq!(redact_url("redis://cache:6379"), "redis://cache:6379");
        assert_eq!(
            redact_url("postgres://db/media?user=a@b"),
            "postgres://db/media?user=a@b"
        );
        assert_eq!(redact_url("not a url"), "not a url");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("nope"));
    }
}
