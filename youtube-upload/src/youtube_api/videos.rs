//! YouTube Videos API types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request body for the `videos.insert` API call.
///
/// Only the sections that are present are listed in the `part` query parameter, see
/// [`VideoInsertRequest::parts`].
///
/// See: <https://developers.google.com/youtube/v3/docs/videos/insert>
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInsertRequest {
    /// Basic details about the video.
    pub snippet: VideoSnippet,
    /// Upload and privacy status.
    pub status: VideoStatus,
    /// Where the video was recorded.
    #[serde(rename = "recordingDetails", skip_serializing_if = "Option::is_none")]
    pub recording_details: Option<RecordingDetails>,
}

impl VideoInsertRequest {
    /// The value for the `part` parameter of `videos.insert`.
    pub fn parts(&self) -> String {
        let mut parts = vec!["snippet", "status"];
        if self.recording_details.is_some() {
            parts.push("recordingDetails");
        }
        parts.join(",")
    }
}

/// See: <https://developers.google.com/youtube/v3/docs/videos#snippet>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSnippet {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// The numeric category id, as a string.
    #[serde(rename = "categoryId", skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

/// See: <https://developers.google.com/youtube/v3/docs/videos#status>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStatus {
    /// `public`, `unlisted` or `private`.
    #[serde(rename = "privacyStatus")]
    pub privacy_status: String,
}

/// See: <https://developers.google.com/youtube/v3/docs/videos#recordingDetails>
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingDetails {
    /// `latitude`, `longitude` and optionally `altitude`.
    pub location: BTreeMap<String, f64>,
}

/// A `video` resource as returned by a completed upload.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#resource>
#[derive(Debug, Deserialize)]
pub struct Video {
    /// The ID that YouTube uses to uniquely identify the video.
    pub id: String,
}
