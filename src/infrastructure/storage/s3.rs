use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::{config::BehaviorVersion, config::Credentials, config::Region, Client};
use tracing::{debug, info};

use super::device::{join_path, StorageDevice, StorageError, StorageResult};

// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH: usize = 1000;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub async fn new(endpoint: &str, bucket: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Connected to S3 (MinIO)");

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes::Bytes::from(body)))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;
        Ok(())
    }

    pub async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::ReadFailed(format!("{}: {}", key, e))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();
        Ok(data)
    }

    pub async fn head_object(&self, key: &str) -> StorageResult<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(StorageError::ReadFailed(format!("{}: {}", key, e)))
                }
            }
        }
    }

    pub async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ReadFailed(format!("list {}: {}", prefix, e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(keys)
    }

    pub async fn delete_keys(&self, keys: &[String]) -> StorageResult<usize> {
        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;
        }
        Ok(keys.len())
    }
}

/// Tenant device rooted at a key prefix inside the shared bucket.
#[derive(Clone)]
pub struct S3Device {
    storage: StorageService,
    root: String,
}

impl S3Device {
    pub fn new(storage: StorageService, root: impl Into<String>) -> Self {
        Self {
            storage,
            root: root.into(),
        }
    }

    fn key(&self, path: &str) -> StorageResult<String> {
        let root = self.root.trim_end_matches('/');
        if !path.starts_with(root) || path.split('/').any(|part| part == "..") {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(path.trim_start_matches('/').to_string())
    }
}

#[async_trait]
impl StorageDevice for S3Device {
    fn get_path(&self, id: &str) -> String {
        join_path(&self.root, id)
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let key = self.key(path)?;
        self.storage.get_object(&key).await
    }

    async fn write(&self, path: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let key = self.key(path)?;
        debug!(key, content_type, bytes = data.len(), "Uploading object");
        self.storage.put_object(&key, data, content_type).await
    }

    async fn delete_path(&self, path: &str) -> StorageResult<()> {
        let key = self.key(path)?;
        let prefix = format!("{}/", key.trim_end_matches('/'));

        let mut keys = self.storage.list_keys(&prefix).await?;
        if self.storage.head_object(&key).await? {
            keys.push(key);
        }

        let deleted = self.storage.delete_keys(&keys).await?;
        debug!(path, deleted, "Deleted objects");
        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let key = self.key(path)?;
        self.storage.head_object(&key).await
    }
}
