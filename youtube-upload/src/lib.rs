//! Upload videos to YouTube from the command line.
//!
//! The binary parses [`options::Options`] into a [`options::Config`] and hands it to [`run`].
//! Failures carry an [`error::UploadError`] that decides the process exit status.

pub mod auth;
pub mod credentials;
pub mod error;
pub mod metadata;
pub mod oauth;
pub mod options;
pub mod progress;
pub mod upload;
pub mod youtube_api;

use eyre::Context;
use options::Config;

/// Authenticates, uploads every video in `config` in order, and stores the credentials.
///
/// Status lines are written to stdout. The first failed video ends the run.
pub async fn run(config: Config) -> eyre::Result<()> {
    let client = auth::authenticate(&config.auth).await?;

    let mut stdout = std::io::stdout().lock();
    let uploaded = upload::upload_videos(&client, &config, &mut stdout, progress::for_type).await;

    // a refresh during the uploads is worth keeping even if an upload failed
    if let Err(e) = auth::persist(&client, &config.auth).await {
        tracing::warn!("could not store credentials: {e:#}");
    }

    let video_ids = uploaded?;
    tracing::debug!(count = video_ids.len(), "all videos uploaded");
    Ok(())
}

/// Like [`run`], but on a single-threaded runtime of its own.
pub fn run_blocking(config: Config) -> eyre::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("start async runtime")?
        .block_on(run(config))
}
