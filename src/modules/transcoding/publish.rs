use std::path::Path;

use tracing::{debug, info};

use super::status::RenditionStatusManager;
use crate::error::{TranscodeError, TranscodeResult};
use crate::infrastructure::storage::StorageDevice;

/// Content type for an output file. Streaming formats are pinned, the rest
/// is guessed from the extension.
pub fn content_type(file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/mp2t".to_string(),
        Some("mpd") => "application/dash+xml".to_string(),
        Some("m4s") => "video/iso.segment".to_string(),
        _ => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Files to publish from `out_dir`, sorted by name. Directories and engine
/// side files containing `.json` are skipped.
pub async fn list_artifacts(out_dir: &Path) -> TranscodeResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(out_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.contains(".json") {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Uploads every artifact under `{videos.get_path(videoId)}/{renditionName}`
/// and drives the record through `uploading` to `ready`. Returns the
/// published rendition path.
pub async fn publish_artifacts(
    videos: &dyn StorageDevice,
    out_dir: &Path,
    video_id: &str,
    rendition_name: &str,
    status: &mut RenditionStatusManager,
) -> TranscodeResult<String> {
    let artifacts = list_artifacts(out_dir).await?;
    if artifacts.is_empty() {
        return Err(TranscodeError::NoArtifacts);
    }

    let rendition_path = format!(
        "{}/{}",
        videos.get_path(video_id).trim_end_matches('/'),
        rendition_name
    );

    for (index, name) in artifacts.iter().enumerate() {
        let data = tokio::fs::read(out_dir.join(name)).await?;
        let mime = content_type(name);
        debug!(file = %name, mime = %mime, bytes = data.len(), "Uploading artifact");

        videos
            .write(&format!("{}/{}", rendition_path, name), data, &mime)
            .await?;

        if index == 0 {
            status.mark_uploading(&rendition_path).await?;
        }
    }

    status.mark_ready().await?;
    info!(path = %rendition_path, files = artifacts.len(), "📤 Rendition published");
    Ok(rendition_path)
}
