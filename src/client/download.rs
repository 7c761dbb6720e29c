//! Streams a remote video to a local temp file with throttled progress
//! (§4.G). Shared by sync-on-join and the ready-sync download path in
//! `ws.rs`.

use std::time::Instant;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::config::PROGRESS_NOTIFICATION_INTERVAL;
use crate::error::RdmError;
use crate::ids::VideoId;

use super::{ClientEvent, SessionClient};

impl SessionClient {
    /// Downloads `video_id` into the client's download directory, skipping
    /// the transfer entirely if a local path is already recorded for it
    /// (§4.G "skip downloading if `local_path` already exists"). Emits
    /// throttled `DownloadProgress` events and a final `VideoReady` on
    /// completion.
    pub async fn download_video(&self, video_id: VideoId) -> Result<std::path::PathBuf, RdmError> {
        if let Some(path) = self.local_path(video_id) {
            return Ok(path);
        }

        let code = self.room_code().ok_or(RdmError::Transient)?;
        let url = format!("{}/rooms/{}/videos/{}", self.base_url_owned(), code, video_id);
        let resp = self
            .http_client()
            .get(&url)
            .send()
            .await
            .map_err(|_| RdmError::Transient)?;
        if !resp.status().is_success() {
            return Err(RdmError::NotFound);
        }
        let total = resp.content_length().unwrap_or(0);

        let dest_dir = {
            // download_path_for already joins the download dir; make sure
            // it exists before creating the file.
            let path = self.download_path_for(video_id);
            path.parent().map(|p| p.to_path_buf())
        };
        if let Some(dir) = dest_dir {
            let _ = tokio::fs::create_dir_all(&dir).await;
        }
        let dest = self.download_path_for(video_id);
        let mut file = tokio::fs::File::create(&dest).await.map_err(|_| RdmError::Transient)?;

        let mut received: u64 = 0;
        let mut last_emit = Instant::now() - PROGRESS_NOTIFICATION_INTERVAL;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|_| RdmError::Transient)?;
            received += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|_| RdmError::Transient)?;

            let now = Instant::now();
            if now.duration_since(last_emit) >= PROGRESS_NOTIFICATION_INTERVAL || received >= total {
                last_emit = now;
                let fraction = if total == 0 { 1.0 } else { received as f64 / total as f64 };
                self.emit(ClientEvent::DownloadProgress { video_id, fraction });
            }
        }
        file.flush().await.map_err(|_| RdmError::Transient)?;

        self.record_local_path(video_id, dest.clone(), "");
        self.emit(ClientEvent::VideoReady {
            video_id,
            path: dest.clone(),
        });
        Ok(dest)
    }
}
