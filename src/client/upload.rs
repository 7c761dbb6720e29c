//! Streams a local file to the upload endpoint with throttled progress
//! (§4.G, §9: "a wrapping byte-source that emits throttled progress
//! notifications as a side effect of each read").

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::StreamExt;
use tokio_util::io::ReaderStream;

use crate::config::{PROGRESS_NOTIFICATION_INTERVAL, UPLOAD_WRITE_CHUNK_SIZE};
use crate::error::RdmError;
use crate::ids::VideoId;

use super::{ClientEvent, SessionClient};

impl SessionClient {
    /// Uploads `path` into the current room, emitting at most one
    /// `UploadProgress` event per [`PROGRESS_NOTIFICATION_INTERVAL`]. On
    /// success, records the upload under `catalogue[video_id].local_path`
    /// (the uploader already has the bytes) and sends `play_video` (§4.G).
    /// On failure, surfaces a `RoomError` and returns without sending
    /// anything.
    pub async fn share_video(&self, path: &Path) -> Result<VideoId, RdmError> {
        match self.upload_file(path).await {
            Ok(video_id) => {
                self.play_video(video_id);
                Ok(video_id)
            }
            Err(err) => {
                self.emit(ClientEvent::RoomError {
                    message: err.message(),
                });
                Err(err)
            }
        }
    }

    /// The raw upload, without the `play_video` follow-up — used by
    /// `share_video` and by the shared-pool handler in `ws.rs`.
    pub(crate) async fn upload_file(&self, path: &Path) -> Result<VideoId, RdmError> {
        let code = self.room_code().ok_or(RdmError::Transient)?;
        let user_id = self.user_id();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let metadata = tokio::fs::metadata(path).await.map_err(|_| RdmError::Transient)?;
        let total = metadata.len();
        let file = tokio::fs::File::open(path).await.map_err(|_| RdmError::Transient)?;

        let progress = Arc::new(Mutex::new((0u64, Instant::now() - PROGRESS_NOTIFICATION_INTERVAL)));
        let client = self.clone();
        let reader_stream = ReaderStream::with_capacity(file, UPLOAD_WRITE_CHUNK_SIZE).inspect(
            move |chunk| {
                if let Ok(bytes) = chunk {
                    let mut guard = progress.lock().unwrap();
                    guard.0 += bytes.len() as u64;
                    let now = Instant::now();
                    if now.duration_since(guard.1) >= PROGRESS_NOTIFICATION_INTERVAL || guard.0 >= total {
                        guard.1 = now;
                        let fraction = if total == 0 { 1.0 } else { guard.0 as f64 / total as f64 };
                        client.emit(ClientEvent::UploadProgress { fraction });
                    }
                }
            },
        );

        let body = reqwest::Body::wrap_stream(reader_stream);
        let part = reqwest::multipart::Part::stream_with_length(body, total)
            .file_name(filename.clone())
            .mime_str("application/octet-stream")
            .map_err(|_| RdmError::Transient)?;
        let form = reqwest::multipart::Form::new()
            .text("user_id", user_id.to_string())
            .part("file", part);

        let url = format!("{}/rooms/{}/upload", self.base_url_owned(), code);
        let resp = self
            .http_client()
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|_| RdmError::Transient)?;

        if !resp.status().is_success() {
            return Err(match resp.status() {
                reqwest::StatusCode::PAYLOAD_TOO_LARGE => RdmError::PayloadTooLarge,
                reqwest::StatusCode::FORBIDDEN => RdmError::Forbidden("not a member of this room".into()),
                reqwest::StatusCode::NOT_FOUND => RdmError::NotFound,
                _ => RdmError::Transient,
            });
        }

        #[derive(serde::Deserialize)]
        struct UploadResponse {
            video_id: VideoId,
            filename: String,
            #[allow(dead_code)]
            size: u64,
        }
        let body: UploadResponse = resp.json().await.map_err(|_| RdmError::Transient)?;
        self.note_uploaded(body.video_id, body.filename, Some(path.to_path_buf()));
        Ok(body.video_id)
    }
}
