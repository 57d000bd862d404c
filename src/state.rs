use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::DbPool;
use crate::infrastructure::db::PgDocumentStore;
use crate::infrastructure::media::MediaEngine;
use crate::infrastructure::queue::RabbitMqService;
use crate::infrastructure::redis::{RedisService, RenditionLock};
use crate::infrastructure::storage::{LocalDevice, S3Device, StorageDevice, StorageService};
use crate::modules::transcoding::{PipelineSettings, TranscodeDeps};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub redis: RedisService,
    pub queue: RabbitMqService,
    /// Present when `STORAGE_DEVICE=s3`.
    pub storage: Option<StorageService>,
    pub engine: Arc<dyn MediaEngine>,
    pub lock: Arc<dyn RenditionLock>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        redis: RedisService,
        queue: RabbitMqService,
        storage: Option<StorageService>,
        engine: Arc<dyn MediaEngine>,
        lock: Arc<dyn RenditionLock>,
    ) -> Self {
        Self {
            config,
            db,
            redis,
            queue,
            storage,
            engine,
            lock,
        }
    }

    fn device(&self, root: String) -> Arc<dyn StorageDevice> {
        match &self.storage {
            Some(storage) => Arc::new(S3Device::new(storage.clone(), root)),
            None => Arc::new(LocalDevice::new(root)),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            workspace_root: self.config.workspace_root.clone(),
            public_endpoint: self.config.public_endpoint.clone(),
            lease_ttl: self.config.lease_ttl,
            keep_workspace: self.config.workspace_keep,
        }
    }

    /// Store and devices scoped to one tenant project.
    pub fn transcode_deps(&self, project_id: &str) -> TranscodeDeps {
        TranscodeDeps {
            store: Arc::new(PgDocumentStore::new(self.db.clone(), project_id)),
            files: self.device(self.config.files_root(project_id)),
            videos: self.device(self.config.videos_root(project_id)),
            engine: self.engine.clone(),
            lock: self.lock.clone(),
            keys: self.config.keys.clone(),
            settings: self.pipeline_settings(),
        }
    }
}
