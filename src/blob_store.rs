//! Per-room clip storage on the local filesystem (§4.C).
//!
//! Each room gets its own directory under the configured upload root, named
//! by room code. Files within it are named `<video_id>_<sanitised filename>`
//! (§6), keeping the original basename (for content-type inference and
//! browser download prompts) while ruling out path traversal through a
//! crafted upload filename.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use futures::Stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::config::UPLOAD_WRITE_CHUNK_SIZE;
use crate::error::RdmError;
use crate::ids::{RoomCode, VideoId};

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

pub struct WrittenBlob {
    pub stored_filename: String,
    pub size: u64,
}

impl BlobStore {
    pub fn new(upload_root: &str, room_code: &RoomCode) -> Self {
        let mut root = PathBuf::from(upload_root);
        root.push(room_code.as_str());
        Self { root }
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self {
            root: std::env::temp_dir().join(format!("rdm-test-{}", uuid::Uuid::new_v4())),
        }
    }

    fn stored_filename(video_id: VideoId, original_filename: &str) -> String {
        format!("{video_id}_{}", sanitise_filename(original_filename))
    }

    fn path_for(&self, stored_filename: &str) -> PathBuf {
        self.root.join(stored_filename)
    }

    /// Streams `body` to disk, enforcing `max_size` as a hard cap. On
    /// overflow the partial file is deleted and `PayloadTooLarge` returned
    /// (§4.C, §8 invariant 8).
    pub async fn write<S, E>(
        &self,
        video_id: VideoId,
        original_filename: &str,
        mut body: S,
        max_size: u64,
    ) -> Result<WrittenBlob, RdmError>
    where
        S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|_| RdmError::Transient)?;

        let stored_filename = Self::stored_filename(video_id, original_filename);
        let path = self.path_for(&stored_filename);
        let mut file = File::create(&path).await.map_err(|_| RdmError::Transient)?;

        let mut written: u64 = 0;
        use futures::StreamExt;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|_| RdmError::Transient)?;
            written += chunk.len() as u64;
            if written > max_size {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(RdmError::PayloadTooLarge);
            }
            file.write_all(&chunk).await.map_err(|_| RdmError::Transient)?;
        }
        file.flush().await.map_err(|_| RdmError::Transient)?;

        Ok(WrittenBlob {
            stored_filename,
            size: written,
        })
    }

    /// Opens a bounded byte-range read over a stored blob, chunked at
    /// `RANGE_READ_CHUNK_SIZE` (§4.C, §5).
    pub async fn open_range(
        &self,
        stored_filename: &str,
        start: u64,
        end_inclusive: u64,
    ) -> Result<impl Stream<Item = std::io::Result<bytes::Bytes>>, RdmError> {
        let path = self.path_for(stored_filename);
        let mut file = File::open(&path).await.map_err(|_| RdmError::NotFound)?;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|_| RdmError::MalformedInput("range start beyond end of file".into()))?;

        let len = end_inclusive.saturating_sub(start) + 1;
        let bounded = file.take(len);
        let stream = ReaderStream::with_capacity(bounded, crate::config::RANGE_READ_CHUNK_SIZE);
        Ok(stream)
    }

    /// Removes a single stored blob, ignoring errors (best-effort cleanup
    /// for a blob that turns out not to belong, e.g. an upload rejected for
    /// not being a room member after the file part already hit disk).
    pub async fn delete(&self, stored_filename: &str) {
        let _ = tokio::fs::remove_file(self.path_for(stored_filename)).await;
    }

    pub async fn file_size(&self, stored_filename: &str) -> Result<u64, RdmError> {
        let path = self.path_for(stored_filename);
        let metadata = tokio::fs::metadata(&path).await.map_err(|_| RdmError::NotFound)?;
        Ok(metadata.len())
    }

    /// Recursively deletes this room's entire blob directory (§4.C). Run on
    /// the blocking pool since large directories make this a slow syscall.
    pub async fn drop_room(self) {
        let root = self.root;
        let _ = tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&root)).await;
    }
}

/// Strips any path component from an uploaded filename and replaces
/// anything but ASCII alphanumerics, `.`, `_`, and `-` with `_`, so it's
/// safe to join onto a directory path (§6).
fn sanitise_filename(original_filename: &str) -> String {
    let basename = Path::new(original_filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.bin");
    let sanitised: String = basename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if sanitised.is_empty() || sanitised.chars().all(|c| c == '.') {
        "upload.bin".to_string()
    } else {
        sanitised
    }
}

/// Infers a `Content-Type` from a filename's extension, for the download
/// endpoint (§6).
pub fn content_type_for(filename: &str) -> &'static str {
    match Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("flv") => "video/x-flv",
        Some("wmv") => "video/x-ms-wmv",
        Some("m4v") => "video/x-m4v",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn write_then_read_back_round_trips() {
        let store = BlobStore::new_for_test();
        let video_id = VideoId::new();
        let payload = vec![Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"hello world"))];
        let written = store
            .write(video_id, "clip.mp4", stream::iter(payload), 1024)
            .await
            .unwrap();
        assert_eq!(written.size, 11);

        let size = store.file_size(&written.stored_filename).await.unwrap();
        assert_eq!(size, 11);
        store.drop_room().await;
    }

    #[tokio::test]
    async fn write_over_cap_is_rejected_and_cleaned_up() {
        let store = BlobStore::new_for_test();
        let video_id = VideoId::new();
        let payload = vec![Ok::<_, std::io::Error>(bytes::Bytes::from_static(&[0u8; 32]))];
        let result = store
            .write(video_id, "clip.mp4", stream::iter(payload), 8)
            .await;
        assert!(matches!(result, Err(RdmError::PayloadTooLarge)));
        store.drop_room().await;
    }

    #[test]
    fn stored_filename_keeps_the_sanitised_basename() {
        let video_id = VideoId::new();
        let stored = BlobStore::stored_filename(video_id, "clip.mp4");
        assert_eq!(stored, format!("{video_id}_clip.mp4"));
    }

    #[test]
    fn stored_filename_strips_path_components_and_unsafe_characters() {
        let video_id = VideoId::new();
        let stored = BlobStore::stored_filename(video_id, "../../etc/pa ss*wd?.mp4");
        assert_eq!(stored, format!("{video_id}_pa_ss_wd_.mp4"));
    }

    #[test]
    fn content_type_inference() {
        assert_eq!(content_type_for("movie.MP4"), "video/mp4");
        assert_eq!(content_type_for("clip.webm"), "video/webm");
        assert_eq!(content_type_for("unknown.xyz"), "application/octet-stream");
    }
}
