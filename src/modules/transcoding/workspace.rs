//! Per-job scratch directories: `root/{videoId}/{profileId}/{in,out}`.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::events::validate_uid;
use crate::error::{TranscodeError, TranscodeResult};

#[derive(Debug, Clone)]
pub struct Workspace {
    base: PathBuf,
    in_dir: PathBuf,
    out_dir: PathBuf,
    video_id: String,
}

impl Workspace {
    /// Creates both directories. Safe to call on an existing workspace.
    pub async fn prepare(root: &Path, video_id: &str, profile_id: &str) -> TranscodeResult<Self> {
        for id in [video_id, profile_id] {
            validate_uid(id)
                .map_err(|_| TranscodeError::InvalidJob(format!("unsafe identifier {id:?}")))?;
        }

        let base = root.join(video_id).join(profile_id);
        let in_dir = base.join("in");
        let out_dir = base.join("out");

        tokio::fs::create_dir_all(&in_dir).await?;
        tokio::fs::create_dir_all(&out_dir).await?;

        Ok(Self {
            base,
            in_dir,
            out_dir,
            video_id: video_id.to_string(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn in_dir(&self) -> &Path {
        &self.in_dir
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Engine output files are named after `out/{videoId}`.
    pub fn output_prefix(&self) -> PathBuf {
        self.out_dir.join(&self.video_id)
    }

    /// Location of the materialized source, named after the stored file.
    pub fn input_path(&self, source_path: &str) -> PathBuf {
        let name = Path::new(source_path)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "source".into());
        self.in_dir.join(name)
    }

    /// Best-effort removal. Never fails the job.
    pub async fn release(&self, keep: bool) {
        if keep {
            info!(path = %self.base.display(), "Keeping workspace");
            return;
        }

        match tokio::fs::remove_dir_all(&self.base).await {
            Ok(()) => info!(path = %self.base.display(), "🧹 Workspace cleaned up"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.base.display(), "Failed to clean workspace: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let root = tempfile::tempdir().unwrap();

        let first = Workspace::prepare(root.path(), "v1", "p1").await.unwrap();
        let second = Workspace::prepare(root.path(), "v1", "p1").await.unwrap();

        assert!(first.in_dir().is_dir());
        assert!(first.out_dir().is_dir());
        assert_eq!(first.base(), second.base());
        assert_eq!(first.output_prefix(), root.path().join("v1/p1/out/v1"));
    }

    #[tokio::test]
    async fn test_input_path_uses_basename() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::prepare(root.path(), "v1", "p1").await.unwrap();

        assert_eq!(
            ws.input_path("/storage/uploads/app-x/abc/movie.mp4"),
            root.path().join("v1/p1/in/movie.mp4")
        );
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let root = tempfile::tempdir().unwrap();
        assert!(Workspace::prepare(root.path(), "..", "p1").await.is_err());
        assert!(Workspace::prepare(root.path(), "v1", "a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_release() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::prepare(root.path(), "v1", "p1").await.unwrap();

        ws.release(true).await;
        assert!(ws.base().exists());

        ws.release(false).await;
        assert!(!ws.base().exists());

        // Releasing twice is harmless.
        ws.release(false).await;
    }
}
