//! YouTube Data API v3 client library.
//!
//! Just enough of the API to upload videos: an authenticated client that keeps its OAuth token
//! fresh, the `videos.insert` request and response types, the resumable upload protocol, and
//! the table of video categories.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use youtube_upload::progress::SilentProgress;
//! use youtube_upload::youtube_api::{YouTubeClient, http_client};
//! # use youtube_upload::youtube_api::videos::VideoInsertRequest;
//!
//! # async fn example(body: VideoInsertRequest) -> eyre::Result<()> {
//! let client = YouTubeClient::with_access_token("ya29...".to_string(), http_client(None)?);
//! let video = client
//!     .insert_video(Path::new("talk.mp4"), &body, &mut SilentProgress)
//!     .await?;
//! println!("https://www.youtube.com/watch?v={}", video.id);
//! # Ok(())
//! # }
//! ```

pub mod categories;
pub mod client;
pub mod upload;
pub mod videos;

pub use client::{TimeBoundAccessToken, UploadSettings, YouTubeClient, http_client};
pub use videos::{Video, VideoInsertRequest};
