use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::encode::{run_encode, EncodePlan};
use super::events::TranscodeJob;
use super::model::{SourceVideo, VideoProfile, VIDEOS, VIDEO_PROFILES};
use super::probe::probe_media;
use super::publish::publish_artifacts;
use super::reconcile::remove_prior;
use super::source::SourceResolver;
use super::status::RenditionStatusManager;
use super::workspace::Workspace;
use crate::config::keys::KeyRing;
use crate::error::{TranscodeError, TranscodeResult};
use crate::infrastructure::db::{Document, DocumentStore, ElevatedToken, Filter};
use crate::infrastructure::media::MediaEngine;
use crate::infrastructure::redis::{rendition_key, Lease, RenditionLock};
use crate::infrastructure::storage::StorageDevice;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workspace_root: PathBuf,
    pub public_endpoint: String,
    pub lease_ttl: Duration,
    pub keep_workspace: bool,
}

/// Everything one job needs, already scoped to the job's project.
#[derive(Clone)]
pub struct TranscodeDeps {
    pub store: Arc<dyn DocumentStore>,
    pub files: Arc<dyn StorageDevice>,
    pub videos: Arc<dyn StorageDevice>,
    pub engine: Arc<dyn MediaEngine>,
    pub lock: Arc<dyn RenditionLock>,
    pub keys: KeyRing,
    pub settings: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Ready {
        rendition_id: String,
        path: String,
    },
    /// The record exists and was moved to `error`.
    Failed {
        rendition_id: String,
        code: String,
        message: String,
    },
}

pub struct TranscodeTask {
    deps: TranscodeDeps,
    job: TranscodeJob,
    lease: Lease,
    workspace: Workspace,
    elevated: ElevatedToken,
}

impl TranscodeTask {
    /// Takes the rendition lease, then prepares the workspace. A busy pair
    /// fails here without touching the disk.
    pub async fn init(deps: TranscodeDeps, job: TranscodeJob) -> TranscodeResult<Self> {
        let key = rendition_key(job.project_id(), &job.video_id, &job.profile_id);
        let lease = deps
            .lock
            .acquire(&key, deps.settings.lease_ttl)
            .await?
            .ok_or_else(|| TranscodeError::Busy(key))?;

        let workspace =
            match Workspace::prepare(&deps.settings.workspace_root, &job.video_id, &job.profile_id)
                .await
            {
                Ok(workspace) => workspace,
                Err(e) => {
                    release_lease(deps.lock.as_ref(), &lease).await;
                    return Err(e);
                }
            };

        Ok(Self {
            deps,
            job,
            lease,
            workspace,
            elevated: ElevatedToken::system(),
        })
    }

    pub fn job(&self) -> &TranscodeJob {
        &self.job
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Errors returned here happened before a rendition record existed.
    pub async fn run(&self, cancel: CancellationToken) -> TranscodeResult<JobOutcome> {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        let video_doc = self
            .find(VIDEOS, &self.job.video_id)
            .await?
            .ok_or_else(|| TranscodeError::VideoNotFound(self.job.video_id.clone()))?;
        let video: SourceVideo = video_doc.to_typed()?;

        let profile: VideoProfile = self
            .find(VIDEO_PROFILES, &self.job.profile_id)
            .await?
            .ok_or_else(|| TranscodeError::ProfileNotFound(self.job.profile_id.clone()))?
            .to_typed()?;

        let resolver = SourceResolver::new(
            self.deps.store.clone(),
            self.deps.files.clone(),
            self.deps.engine.clone(),
            self.deps.keys.clone(),
            self.elevated,
        );
        let input = resolver.materialize(&video, &self.workspace).await?;

        let source_info = probe_media(self.deps.engine.as_ref(), &input).await?;
        let mut updated = video_doc;
        updated.merge(source_info.to_value()?);
        self.deps
            .store
            .update(self.elevated.into(), VIDEOS, &updated)
            .await?;

        remove_prior(
            self.deps.store.as_ref(),
            self.deps.videos.as_ref(),
            self.elevated,
            &video.id,
            &profile.id,
        )
        .await?;

        let mut status = RenditionStatusManager::create(
            self.deps.store.clone(),
            self.elevated,
            &video.id,
            &profile,
        )
        .await?;

        let plan = EncodePlan::new(
            &profile,
            &video.id,
            input,
            &self.workspace,
            &self.deps.settings.public_endpoint,
        );
        info!(rendition = %plan.rendition_name, rendition_id = %status.id(), "🎥 Encoding rendition");

        match self.produce(&plan, &mut status, cancel).await {
            Ok(path) => Ok(JobOutcome::Ready {
                rendition_id: status.id().to_string(),
                path,
            }),
            Err(e) => {
                let code = e.code().to_string();
                let message = e.to_string();
                warn!(
                    outcome = "rendition_failed",
                    rendition_id = %status.id(),
                    code = %code,
                    "Rendition failed: {}",
                    message
                );
                if let Err(write_err) = status.mark_failed(&code, &message).await {
                    error!(rendition_id = %status.id(), "Failed to record rendition error: {}", write_err);
                }
                Ok(JobOutcome::Failed {
                    rendition_id: status.id().to_string(),
                    code,
                    message,
                })
            }
        }
    }

    async fn produce(
        &self,
        plan: &EncodePlan,
        status: &mut RenditionStatusManager,
        cancel: CancellationToken,
    ) -> TranscodeResult<String> {
        run_encode(self.deps.engine.as_ref(), plan, status, cancel.clone()).await?;

        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        publish_artifacts(
            self.deps.videos.as_ref(),
            self.workspace.out_dir(),
            &self.job.video_id,
            &plan.rendition_name,
            status,
        )
        .await
    }

    async fn find(&self, collection: &str, id: &str) -> TranscodeResult<Option<Document>> {
        Ok(self
            .deps
            .store
            .find_one(self.elevated.into(), collection, &[Filter::equal("$id", id)])
            .await?)
    }

    /// Releases the workspace, then the lease. Never fails.
    pub async fn shutdown(self) {
        self.workspace
            .release(self.deps.settings.keep_workspace)
            .await;
        release_lease(self.deps.lock.as_ref(), &self.lease).await;
    }
}

async fn release_lease(lock: &dyn RenditionLock, lease: &Lease) {
    if let Err(e) = lock.release(lease).await {
        warn!(key = %lease.key, "Failed to release lease: {}", e);
    }
}
