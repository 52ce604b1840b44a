//! Resumable media uploads for `videos.insert`.
//!
//! The protocol: a POST with the metadata opens an upload session whose URI comes back in the
//! `Location` header. The file is then PUT to that URI in chunks, each carrying a
//! `Content-Range`. The server answers `308 Resume Incomplete` (with a `Range` header naming the
//! bytes it has) until the last chunk, which is answered with the created video resource.
//!
//! See: <https://developers.google.com/youtube/v3/guides/using_resumable_upload_protocol>

use crate::progress::Progress;
use crate::upload::VideoUploader;
use crate::youtube_api::client::{ApiError, YouTubeClient};
use crate::youtube_api::videos::{Video, VideoInsertRequest};
use bytes::Bytes;
use eyre::Context;
use http::{Method, StatusCode};
use rand::Rng;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

/// Longest wait between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(64);

/// What the server said about one request to the session URI.
#[derive(Debug)]
enum ChunkOutcome {
    /// The server holds the first `committed` bytes and wants more.
    Incomplete { committed: u64 },
    /// The upload is done.
    Complete(Video),
    /// Worth retrying: a 5xx the docs call retriable, or the connection broke.
    Transient(eyre::Report),
}

impl YouTubeClient {
    /// Uploads a video file with the given metadata, returning the created video.
    ///
    /// Progress is reported after every chunk the server acknowledges. Transient failures are
    /// retried with exponential backoff, resuming from whatever the server already received.
    ///
    /// # Required Scopes
    ///
    /// * `https://www.googleapis.com/auth/youtube.upload`
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/insert>
    #[instrument(skip(self, body, progress), fields(title = %body.snippet.title))]
    pub async fn insert_video(
        &self,
        path: &Path,
        body: &VideoInsertRequest,
        progress: &mut dyn Progress,
    ) -> eyre::Result<Video> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        let total = file
            .metadata()
            .await
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .filter(|m| m.starts_with("video/"))
            .unwrap_or("video/*");

        let session = self
            .start_resumable_session(body, total, content_type)
            .await
            .context("start resumable upload session")?;

        let mut offset = 0;
        let mut reported = None;
        let mut retries = 0;
        loop {
            let outcome = if offset < total || (total == 0 && reported.is_none()) {
                let len = (total - offset).min(self.upload.chunk_size as u64);
                let mut chunk = vec![0; len as usize];
                file.seek(SeekFrom::Start(offset))
                    .await
                    .with_context(|| format!("seek in {}", path.display()))?;
                file.read_exact(&mut chunk)
                    .await
                    .with_context(|| format!("read {}", path.display()))?;
                self.put_chunk(&session, Bytes::from(chunk), offset, total, content_type)
                    .await?
            } else {
                // everything was sent, but we never heard back that the upload completed
                self.query_session(&session, total).await?
            };

            match outcome {
                ChunkOutcome::Incomplete { committed } => {
                    let committed = committed.min(total);
                    let advanced = committed > offset;
                    offset = committed;
                    if reported.is_none_or(|r| offset > r) {
                        progress.update(total, offset);
                        reported = Some(offset);
                    }
                    if advanced {
                        retries = 0;
                    } else if retries < self.upload.max_retries {
                        retries += 1;
                        let delay = backoff(self.upload.initial_backoff, retries);
                        tracing::warn!(retries, ?delay, offset, "upload made no progress, retrying");
                        tokio::time::sleep(delay).await;
                    } else {
                        eyre::bail!(
                            "upload made no progress past byte {offset} of {total} after {} retries",
                            self.upload.max_retries
                        );
                    }
                }
                ChunkOutcome::Complete(video) => {
                    if reported != Some(total) {
                        progress.update(total, total);
                    }
                    tracing::info!(video_id = %video.id, "upload complete");
                    return Ok(video);
                }
                ChunkOutcome::Transient(e) if retries < self.upload.max_retries => {
                    retries += 1;
                    let delay = backoff(self.upload.initial_backoff, retries);
                    tracing::warn!(retries, ?delay, "transient upload failure, retrying: {e:#}");
                    tokio::time::sleep(delay).await;
                    match self.query_session(&session, total).await? {
                        ChunkOutcome::Incomplete { committed } => {
                            offset = committed.min(total);
                            if reported.is_none_or(|r| offset > r) {
                                progress.update(total, offset);
                                reported = Some(offset);
                            }
                        }
                        ChunkOutcome::Complete(video) => {
                            if reported != Some(total) {
                                progress.update(total, total);
                            }
                            return Ok(video);
                        }
                        // leave the offset alone and let the next attempt find out
                        ChunkOutcome::Transient(e) => {
                            tracing::debug!("upload status query failed too: {e:#}");
                        }
                    }
                }
                ChunkOutcome::Transient(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("upload failed after {} retries", self.upload.max_retries)
                    });
                }
            }
        }
    }

    /// Opens an upload session and returns its URI.
    async fn start_resumable_session(
        &self,
        body: &VideoInsertRequest,
        total: u64,
        content_type: &str,
    ) -> eyre::Result<String> {
        let parts = body.parts();
        let query_params = [("uploadType", "resumable"), ("part", parts.as_str())];
        let headers = [
            ("X-Upload-Content-Length", total.to_string()),
            ("X-Upload-Content-Type", content_type.to_string()),
        ];

        let mut retries = 0;
        let response = loop {
            match self
                .make_authenticated_request(
                    Method::POST,
                    &self.upload.endpoint,
                    Some(&query_params),
                    &headers,
                    Some(body),
                )
                .await
            {
                Ok(response) => break response,
                Err(e) if is_retriable_report(&e) && retries < self.upload.max_retries => {
                    retries += 1;
                    let delay = backoff(self.upload.initial_backoff, retries);
                    tracing::warn!(retries, ?delay, "could not open upload session, retrying: {e:#}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let session = response
            .headers()
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| eyre::eyre!("no upload session URL in response"))?
            .to_string();

        tracing::debug!(session, "resumable upload session started");
        Ok(session)
    }

    /// Sends `chunk`, which starts at byte `offset` of a `total`-byte file.
    async fn put_chunk(
        &self,
        session: &str,
        chunk: Bytes,
        offset: u64,
        total: u64,
        content_type: &str,
    ) -> eyre::Result<ChunkOutcome> {
        let content_range = if chunk.is_empty() {
            format!("bytes */{total}")
        } else {
            format!("bytes {}-{}/{}", offset, offset + chunk.len() as u64 - 1, total)
        };
        tracing::trace!(content_range, "uploading chunk");

        let access_token = self.fresh_access_token(false).await?;
        let request = self
            .http_client()
            .put(session)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", content_type)
            .header("Content-Range", content_range)
            .body(chunk);
        self.session_outcome(request).await
    }

    /// Asks the server how much of the file it has.
    async fn query_session(&self, session: &str, total: u64) -> eyre::Result<ChunkOutcome> {
        let access_token = self.fresh_access_token(false).await?;
        let request = self
            .http_client()
            .put(session)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Range", format!("bytes */{total}"))
            .body(Bytes::new());
        self.session_outcome(request).await
    }

    async fn session_outcome(&self, request: reqwest::RequestBuilder) -> eyre::Result<ChunkOutcome> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(e).context("build upload request"),
            Err(e) => {
                return Ok(ChunkOutcome::Transient(
                    eyre::Report::new(e).wrap_err("send upload request"),
                ));
            }
        };

        let status = response.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            let committed = committed_bytes(response.headers().get(http::header::RANGE))?;
            tracing::trace!(committed, "server acknowledged chunk");
            return Ok(ChunkOutcome::Incomplete { committed });
        }
        if is_retriable(status) {
            let text = response.text().await.unwrap_or_default();
            return Ok(ChunkOutcome::Transient(eyre::eyre!(
                "upload request failed with status {status}: {text}"
            )));
        }

        let response = self
            .error_for_status(&Method::PUT, "upload session", response)
            .await?;
        let video: Video = response
            .json()
            .await
            .context("parse YouTube upload response as JSON")?;
        Ok(ChunkOutcome::Complete(video))
    }
}

impl VideoUploader for YouTubeClient {
    async fn upload_video(
        &self,
        path: &Path,
        body: &VideoInsertRequest,
        progress: &mut dyn Progress,
    ) -> eyre::Result<String> {
        Ok(self.insert_video(path, body, progress).await?.id)
    }
}

/// Statuses the upload guide lists as retriable.
fn is_retriable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retriable_report(e: &eyre::Report) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<ApiError>()
            .is_some_and(|e| is_retriable(e.status))
            || cause
                .downcast_ref::<reqwest::Error>()
                .is_some_and(|e| e.is_connect() || e.is_timeout())
    })
}

/// Parses the `Range: bytes=0-N` header of a `308` into the number of bytes received.
fn committed_bytes(range: Option<&http::HeaderValue>) -> eyre::Result<u64> {
    // no Range header means nothing has been received yet
    let Some(range) = range else {
        return Ok(0);
    };
    let range = range.to_str().context("non-ASCII Range header")?;
    let last = range
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .map(|(_, last)| last)
        .ok_or_else(|| eyre::eyre!("malformed Range header: {range}"))?;
    let last: u64 = last
        .parse()
        .with_context(|| format!("malformed Range header: {range}"))?;
    Ok(last + 1)
}

/// `initial * 2^(attempt-1)`, capped, plus up to 50% random jitter.
fn backoff(initial: Duration, attempt: u32) -> Duration {
    let base = initial
        .saturating_mul(1 << attempt.saturating_sub(1).min(16))
        .min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use crate::youtube_api::client::UploadSettings;
    use crate::youtube_api::videos::{VideoSnippet, VideoStatus};
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Debug, Default)]
    struct Recorder {
        updates: Vec<(u64, u64)>,
        finished: usize,
    }

    impl Progress for Recorder {
        fn update(&mut self, total: u64, completed: u64) {
            self.updates.push((total, completed));
        }
        fn finish(&mut self) {
            self.finished += 1;
        }
    }

    /// What the fake upload endpoint has seen.
    #[derive(Debug, Default)]
    struct Server {
        received: Vec<u8>,
        total: u64,
        initiations: Vec<String>,
        content_ranges: Vec<String>,
        /// Status to answer the next chunk PUT with instead of accepting it.
        fail_next_chunk: Option<u16>,
        fail_after_chunks: Option<usize>,
        /// Acknowledge chunks without keeping them.
        drop_chunks: bool,
        /// Answer the session POST with 401.
        reject_token: bool,
    }

    async fn handle(
        state: Arc<Mutex<Server>>,
        addr: std::net::SocketAddr,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let headers = req.headers().clone();
        let body = req.into_body().collect().await?.to_bytes();
        let mut state = state.lock().unwrap();

        if method == Method::POST && uri.path() == "/upload" {
            if state.reject_token {
                return Ok(Response::builder()
                    .status(401)
                    .body(Full::from("invalid credentials"))
                    .unwrap());
            }
            state.total = headers["x-upload-content-length"]
                .to_str()
                .unwrap()
                .parse()
                .unwrap();
            state
                .initiations
                .push(format!("{}|{}", uri.query().unwrap_or(""), String::from_utf8_lossy(&body)));
            return Ok(Response::builder()
                .status(200)
                .header("Location", format!("http://{addr}/session/1"))
                .body(Full::new(Bytes::new()))
                .unwrap());
        }

        assert_eq!(method, Method::PUT);
        assert_eq!(uri.path(), "/session/1");
        let content_range = headers["content-range"].to_str().unwrap().to_string();
        state.content_ranges.push(content_range.clone());

        if !body.is_empty() && !state.drop_chunks {
            if state.fail_after_chunks == Some(0) {
                if let Some(status) = state.fail_next_chunk.take() {
                    state.fail_after_chunks = None;
                    return Ok(Response::builder()
                        .status(status)
                        .body(Full::from("backend error"))
                        .unwrap());
                }
            }
            if let Some(n) = state.fail_after_chunks.as_mut() {
                *n -= 1;
            }
            let start: usize = content_range
                .strip_prefix("bytes ")
                .and_then(|r| r.split_once('-'))
                .map(|(s, _)| s.parse().unwrap())
                .unwrap();
            assert_eq!(start, state.received.len(), "chunks must be contiguous");
            state.received.extend_from_slice(&body);
        }

        if state.received.len() as u64 == state.total {
            return Ok(Response::new(Full::from(
                r#"{"kind":"youtube#video","id":"vid123","snippet":{"title":"t"}}"#,
            )));
        }
        let mut response = Response::builder().status(308);
        if !state.received.is_empty() {
            response = response.header("Range", format!("bytes=0-{}", state.received.len() - 1));
        }
        Ok(response.body(Full::new(Bytes::new())).unwrap())
    }

    async fn fake_upload_server(state: Arc<Mutex<Server>>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((conn, _)) = listener.accept().await else {
                    return;
                };
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(Arc::clone(&state), addr, req));
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(hyper_util::rt::TokioIo::new(conn), service)
                        .await;
                });
            }
        });
        addr
    }

    fn client(addr: std::net::SocketAddr, chunk_size: usize) -> YouTubeClient {
        YouTubeClient::with_access_token(
            "token".into(),
            crate::youtube_api::http_client(None).unwrap(),
        )
        .with_upload_settings(UploadSettings {
            endpoint: format!("http://{addr}/upload"),
            chunk_size,
            max_retries: 3,
            initial_backoff: Duration::ZERO,
        })
    }

    fn body() -> VideoInsertRequest {
        VideoInsertRequest {
            snippet: VideoSnippet {
                title: "t".into(),
                description: String::new(),
                tags: vec!["a".into()],
                category_id: Some("10".into()),
            },
            status: VideoStatus {
                privacy_status: "private".into(),
            },
            recording_details: None,
        }
    }

    fn video_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        std::io::Write::write_all(&mut file, contents).unwrap();
        file
    }

    #[tokio::test]
    async fn uploads_in_chunks() {
        let state = Arc::new(Mutex::new(Server::default()));
        let addr = fake_upload_server(Arc::clone(&state)).await;
        let file = video_file(b"0123456789");

        let mut progress = Recorder::default();
        let video = client(addr, 4)
            .insert_video(file.path(), &body(), &mut progress)
            .await
            .unwrap();

        assert_eq!(video.id, "vid123");
        assert_eq!(progress.updates, [(10, 4), (10, 8), (10, 10)]);
        let state = state.lock().unwrap();
        assert_eq!(state.received, b"0123456789");
        assert_eq!(
            state.content_ranges,
            ["bytes 0-3/10", "bytes 4-7/10", "bytes 8-9/10"]
        );
        assert_eq!(state.initiations.len(), 1);
        let (query, json) = state.initiations[0].split_once('|').unwrap();
        assert!(query.contains("uploadType=resumable"));
        assert!(query.contains("part=snippet%2Cstatus"));
        let json: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(json["snippet"]["categoryId"], "10");
    }

    #[tokio::test]
    async fn resumes_after_transient_failure() {
        let state = Arc::new(Mutex::new(Server {
            fail_next_chunk: Some(503),
            fail_after_chunks: Some(1),
            ..Server::default()
        }));
        let addr = fake_upload_server(Arc::clone(&state)).await;
        let file = video_file(b"0123456789");

        let mut progress = Recorder::default();
        let video = client(addr, 4)
            .insert_video(file.path(), &body(), &mut progress)
            .await
            .unwrap();

        assert_eq!(video.id, "vid123");
        assert_eq!(progress.updates, [(10, 4), (10, 8), (10, 10)]);
        let state = state.lock().unwrap();
        assert_eq!(state.received, b"0123456789");
        assert_eq!(
            state.content_ranges,
            [
                "bytes 0-3/10",
                "bytes 4-7/10",
                "bytes */10",
                "bytes 4-7/10",
                "bytes 8-9/10"
            ]
        );
    }

    #[tokio::test]
    async fn empty_files_report_once() {
        let state = Arc::new(Mutex::new(Server::default()));
        let addr = fake_upload_server(Arc::clone(&state)).await;
        let file = video_file(b"");

        let mut progress = Recorder::default();
        let video = client(addr, 4)
            .insert_video(file.path(), &body(), &mut progress)
            .await
            .unwrap();

        assert_eq!(video.id, "vid123");
        assert_eq!(progress.updates, [(0, 0)]);
        assert_eq!(progress.finished, 0);
    }

    #[tokio::test]
    async fn non_retriable_failures_abort() {
        let state = Arc::new(Mutex::new(Server {
            fail_next_chunk: Some(501),
            fail_after_chunks: Some(0),
            ..Server::default()
        }));
        let addr = fake_upload_server(Arc::clone(&state)).await;
        let file = video_file(b"0123456789");

        let err = client(addr, 4)
            .insert_video(file.path(), &body(), &mut Recorder::default())
            .await
            .unwrap_err();
        assert_eq!(UploadError::from_report(err).exit_code(), 6);
    }

    #[tokio::test]
    async fn stalled_uploads_give_up() {
        let state = Arc::new(Mutex::new(Server {
            drop_chunks: true,
            ..Server::default()
        }));
        let addr = fake_upload_server(Arc::clone(&state)).await;
        let file = video_file(b"0123456789");

        let err = client(addr, 4)
            .insert_video(file.path(), &body(), &mut Recorder::default())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("no progress past byte 0 of 10"));
        // the first attempt plus three retries
        assert_eq!(state.lock().unwrap().content_ranges.len(), 4);
    }

    #[tokio::test]
    async fn rejected_access_token_exits_with_credentials_error() {
        let state = Arc::new(Mutex::new(Server {
            reject_token: true,
            ..Server::default()
        }));
        let addr = fake_upload_server(Arc::clone(&state)).await;
        let file = video_file(b"0123456789");

        let err = client(addr, 4)
            .insert_video(file.path(), &body(), &mut Recorder::default())
            .await
            .unwrap_err();
        let err = UploadError::from_report(err);
        assert_eq!(err.kind(), "AccessTokenCredentialsError");
        assert_eq!(err.exit_code(), 5);
        assert!(state.lock().unwrap().content_ranges.is_empty());
    }

    #[tokio::test]
    async fn missing_files_fail_before_contacting_the_server() {
        let state = Arc::new(Mutex::new(Server::default()));
        let addr = fake_upload_server(Arc::clone(&state)).await;

        let err = client(addr, 4)
            .insert_video(Path::new("/nonexistent/video.mp4"), &body(), &mut Recorder::default())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("open /nonexistent/video.mp4"));
        assert!(state.lock().unwrap().initiations.is_empty());
    }

    #[test]
    fn range_headers() {
        assert_eq!(committed_bytes(None).unwrap(), 0);
        let v = http::HeaderValue::from_static("bytes=0-524287");
        assert_eq!(committed_bytes(Some(&v)).unwrap(), 524288);
        let v = http::HeaderValue::from_static("garbage");
        assert!(committed_bytes(Some(&v)).is_err());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let one = Duration::from_secs(1);
        let first = backoff(one, 1);
        assert!(first >= one && first <= Duration::from_millis(1500));
        let third = backoff(one, 3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_secs(6));
        let late = backoff(one, 30);
        assert!(late >= MAX_BACKOFF && late <= MAX_BACKOFF + MAX_BACKOFF / 2);
        assert_eq!(backoff(Duration::ZERO, 5), Duration::ZERO);
    }
}
