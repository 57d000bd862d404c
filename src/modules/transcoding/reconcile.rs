use tracing::info;

use super::model::RENDITIONS;
use crate::error::TranscodeResult;
use crate::infrastructure::db::{DocumentStore, ElevatedToken, Filter};
use crate::infrastructure::storage::StorageDevice;

/// Removes the previous rendition of `(video_id, profile_id)` and its
/// published artifacts. Returns whether one existed.
pub async fn remove_prior(
    store: &dyn DocumentStore,
    videos: &dyn StorageDevice,
    elevated: ElevatedToken,
    video_id: &str,
    profile_id: &str,
) -> TranscodeResult<bool> {
    let filters = [
        Filter::equal("videoId", video_id),
        Filter::equal("profileId", profile_id),
    ];

    let Some(prior) = store.find_one(elevated.into(), RENDITIONS, &filters).await? else {
        return Ok(false);
    };

    store.delete(elevated.into(), RENDITIONS, &prior.id).await?;

    if let Some(path) = prior.get_str("path").filter(|p| !p.is_empty()) {
        videos.delete_path(path).await?;
    }

    info!(video_id, profile_id, rendition_id = %prior.id, "♻️ Removed prior rendition");
    Ok(true)
}
