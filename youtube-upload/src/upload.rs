//! Uploads a batch of videos, one after the other.

use crate::metadata;
use crate::options::{Config, ProgressType};
use crate::progress::Progress;
use crate::youtube_api::videos::VideoInsertRequest;
use eyre::Context;
use std::future::Future;
use std::io::Write;
use std::path::Path;

const WATCH_VIDEO_URL: &str = "https://www.youtube.com/watch?v=";

/// Something that can turn a file plus metadata into a hosted video.
pub trait VideoUploader {
    /// Uploads `path` with the given metadata and returns the new video's id.
    fn upload_video(
        &self,
        path: &Path,
        body: &VideoInsertRequest,
        progress: &mut dyn Progress,
    ) -> impl Future<Output = eyre::Result<String>>;
}

/// The public page for a video.
pub fn watch_url(video_id: &str) -> String {
    format!("{WATCH_VIDEO_URL}{video_id}")
}

/// Uploads every video in `config`, in order, returning their ids.
///
/// Status lines go to `output`. The first failure ends the batch: later videos are not
/// attempted, and the error is returned as-is so the caller can map it to an exit code.
pub async fn upload_videos<U, W, P>(
    uploader: &U,
    config: &Config,
    output: &mut W,
    mut new_progress: P,
) -> eyre::Result<Vec<String>>
where
    U: VideoUploader,
    W: Write,
    P: FnMut(ProgressType) -> Box<dyn Progress>,
{
    let total = config.videos.len();
    let mut video_ids = Vec::with_capacity(total);

    for (index, video_path) in config.videos.iter().enumerate() {
        let body = metadata::build_request_body(config, video_path, index, total)?;
        let mut progress = new_progress(config.progress_type);

        writeln!(
            output,
            "Start upload: {} ({})",
            video_path.display(),
            body.snippet.title
        )?;
        output.flush()?;

        let uploaded = uploader
            .upload_video(video_path, &body, progress.as_mut())
            .await;
        progress.finish();
        let video_id = uploaded.with_context(|| format!("upload {}", video_path.display()))?;

        tracing::info!(index, video_id = %video_id, "uploaded video");
        writeln!(output, "Video URL {}", watch_url(&video_id))?;
        output.flush()?;
        video_ids.push(video_id);
    }

    Ok(video_ids)
}
