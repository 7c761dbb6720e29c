//! HTTP Surface (§4.D, §6): room creation/join, chunked upload, byte-range
//! download, and a health probe.

mod rejection;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Buf;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

use crate::blob_store::content_type_for;
use crate::config::{Config, PASSWORD_MIN_LEN, USERNAME_MAX_LEN, USERNAME_MIN_LEN};
use crate::error::RdmError;
use crate::ids::{ParticipantId, RoomCode, VideoId};
use crate::protocol::{PlaybackState, UserSummary, VideoSummary};
use crate::registry::Registry;
use crate::room::VideoEntry;

/// `RdmError` doesn't implement `warp`'s blanket conversion into
/// `Rejection` (there isn't one), so every fallible call funnels its error
/// through this single spot.
fn reject(err: RdmError) -> Rejection {
    warp::reject::custom(err)
}

pub fn routes(
    registry: Arc<Registry>,
    config: Arc<Config>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_registry = warp::any().map(move || registry.clone());
    let with_config = warp::any().map(move || config.clone());

    let health = warp::path("health")
        .and(warp::get())
        .and(with_registry.clone())
        .and_then(health_handler);

    let create = warp::path("rooms")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_registry.clone())
        .and_then(create_room_handler);

    let join = warp::path!("rooms" / String / "join")
        .and(warp::post())
        .and(warp::body::json())
        .and(warp::filters::addr::remote())
        .and(with_registry.clone())
        .and_then(join_room_handler);

    // The multipart filter's own byte cap is set generously above the
    // configured per-file limit (it cannot itself distinguish the trailing
    // form fields from the file part); the real per-file cap is enforced by
    // `BlobStore::write` as bytes stream in (§4.C).
    let upload = warp::path!("rooms" / String / "upload")
        .and(warp::post())
        .and(with_config.clone())
        .and(warp::multipart::form().max_length(multipart_cap()))
        .and(with_registry.clone())
        .and_then(upload_handler);

    let download = warp::path!("rooms" / String / "videos" / String)
        .and(warp::get())
        .and(warp::header::optional::<String>("range"))
        .and(with_registry.clone())
        .and_then(download_handler);

    health
        .or(create)
        .or(join)
        .or(upload)
        .or(download)
        .recover(rejection::recover)
}

fn multipart_cap() -> u64 {
    2 * 1024 * 1024 * 1024
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rooms: usize,
}

async fn health_handler(registry: Arc<Registry>) -> Result<impl Reply, Rejection> {
    let rooms = registry.room_count().await;
    Ok(warp::reply::json(&HealthResponse {
        status: "ok",
        rooms,
    }))
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    password: String,
    username: String,
}

#[derive(Serialize)]
struct CreateRoomResponse {
    room_code: String,
    user_id: ParticipantId,
    host_id: ParticipantId,
}

async fn create_room_handler(
    req: CreateRoomRequest,
    registry: Arc<Registry>,
) -> Result<impl Reply, Rejection> {
    validate_credentials(&req.password, &req.username)?;
    let (room, host_id) = registry.create(&req.password).await;
    Ok(warp::reply::json(&CreateRoomResponse {
        room_code: room.code().as_str().to_string(),
        user_id: host_id,
        host_id,
    }))
}

#[derive(Deserialize)]
struct JoinRoomRequest {
    password: String,
    username: String,
}

#[derive(Serialize)]
struct JoinRoomResponse {
    room_code: String,
    user_id: ParticipantId,
    host_id: ParticipantId,
    users: Vec<UserSummary>,
    playback_state: PlaybackState,
    current_video: Option<VideoId>,
    videos: std::collections::HashMap<VideoId, VideoSummary>,
}

async fn join_room_handler(
    code: String,
    req: JoinRoomRequest,
    remote: Option<SocketAddr>,
    registry: Arc<Registry>,
) -> Result<impl Reply, Rejection> {
    validate_credentials(&req.password, &req.username)?;
    let remote_ip = remote.map(|a| a.ip()).unwrap_or([0, 0, 0, 0].into());
    let room = registry
        .verify(&RoomCode::from(code), &req.password, remote_ip)
        .await
        .map_err(reject)?;

    let snapshot = room.peek();
    Ok(warp::reply::json(&JoinRoomResponse {
        room_code: room.code().as_str().to_string(),
        user_id: ParticipantId::new(),
        host_id: snapshot.host_id,
        users: snapshot.users,
        playback_state: snapshot.playback_state,
        current_video: snapshot.current_video,
        videos: snapshot.videos,
    }))
}

fn validate_credentials(password: &str, username: &str) -> Result<(), Rejection> {
    if password.len() < PASSWORD_MIN_LEN {
        return Err(reject(RdmError::MalformedInput("password too short".into())));
    }
    if username.len() < USERNAME_MIN_LEN || username.len() > USERNAME_MAX_LEN {
        return Err(reject(RdmError::MalformedInput(
            "username must be between 1 and 32 characters".into(),
        )));
    }
    Ok(())
}

#[derive(Serialize)]
struct UploadResponse {
    video_id: VideoId,
    filename: String,
    size: u64,
}

async fn upload_handler(
    code: String,
    config: Arc<Config>,
    form: FormData,
    registry: Arc<Registry>,
) -> Result<impl Reply, Rejection> {
    let room = registry
        .lookup(&RoomCode::from(code))
        .await
        .ok_or_else(|| reject(RdmError::NotFound))?;

    let mut user_id: Option<ParticipantId> = None;
    let mut upload: Option<(String, crate::blob_store::WrittenBlob)> = None;
    let video_id = VideoId::new();

    let mut parts = form.into_stream();
    use futures::StreamExt;
    while let Some(part) = parts.next().await {
        let part =
            part.map_err(|_| reject(RdmError::MalformedInput("bad multipart body".into())))?;
        match part.name() {
            "user_id" => {
                let bytes = collect_part_bytes(part).await?;
                let text = String::from_utf8_lossy(&bytes).to_string();
                user_id = Some(
                    text.parse()
                        .map_err(|_| reject(RdmError::MalformedInput("bad user_id".into())))?,
                );
            }
            "file" => {
                let filename = part.filename().unwrap_or("upload.bin").to_string();
                let byte_stream = part
                    .stream()
                    .map_ok(|mut buf| buf.copy_to_bytes(buf.remaining()))
                    .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "multipart read error"));
                let written = room
                    .blob_store()
                    .write(video_id, &filename, byte_stream, config.max_file_size_bytes())
                    .await
                    .map_err(reject)?;
                upload = Some((filename, written));
            }
            _ => {}
        }
    }

    let user_id =
        user_id.ok_or_else(|| reject(RdmError::MalformedInput("missing user_id field".into())))?;
    if !room.is_member(user_id) {
        // The blob was already streamed to disk before `user_id` was known
        // to be a non-member (multipart fields arrive in whatever order the
        // client sent them); don't leave it behind.
        if let Some((_, written)) = &upload {
            room.blob_store().delete(&written.stored_filename).await;
        }
        return Err(reject(RdmError::Forbidden("not a member of this room".into())));
    }
    let (filename, written) =
        upload.ok_or_else(|| reject(RdmError::MalformedInput("missing file field".into())))?;

    room.record_video(
        video_id,
        VideoEntry {
            original_filename: filename.clone(),
            stored_filename: written.stored_filename,
            size: written.size,
            uploader_id: user_id,
            uploaded_at: std::time::Instant::now(),
        },
    );

    Ok(warp::reply::json(&UploadResponse {
        video_id,
        filename,
        size: written.size,
    }))
}

async fn collect_part_bytes(part: warp::multipart::Part) -> Result<bytes::Bytes, Rejection> {
    let chunks: Vec<bytes::Bytes> = part
        .stream()
        .map_ok(|mut buf| buf.copy_to_bytes(buf.remaining()))
        .try_collect()
        .await
        .map_err(|_: warp::Error| reject(RdmError::MalformedInput("bad multipart part".into())))?;
    Ok(chunks.concat().into())
}

async fn download_handler(
    code: String,
    video_id: String,
    range: Option<String>,
    registry: Arc<Registry>,
) -> Result<impl Reply, Rejection> {
    let room = registry
        .lookup(&RoomCode::from(code))
        .await
        .ok_or_else(|| reject(RdmError::NotFound))?;
    let video_id: VideoId = video_id
        .parse()
        .map_err(|_| reject(RdmError::MalformedInput("bad video id".into())))?;
    let stored_filename = room
        .video_stored_filename(video_id)
        .ok_or_else(|| reject(RdmError::NotFound))?;
    let total_size = room
        .blob_store()
        .file_size(&stored_filename)
        .await
        .map_err(reject)?;

    let (start, end, status) = match range.as_deref().and_then(parse_range) {
        Some((start, end)) => (
            start,
            end.unwrap_or(total_size.saturating_sub(1))
                .min(total_size.saturating_sub(1)),
            StatusCode::PARTIAL_CONTENT,
        ),
        None => (0, total_size.saturating_sub(1), StatusCode::OK),
    };

    let stream = room
        .blob_store()
        .open_range(&stored_filename, start, end)
        .await
        .map_err(reject)?;
    let content_length = end.saturating_sub(start) + 1;
    let content_type = content_type_for(&stored_filename);

    let mut response = warp::reply::Response::new(warp::hyper::Body::wrap_stream(stream));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert("Accept-Ranges", "bytes".parse().unwrap());
    headers.insert("Content-Length", content_length.to_string().parse().unwrap());
    headers.insert("Content-Type", content_type.parse().unwrap());
    if status == StatusCode::PARTIAL_CONTENT {
        headers.insert(
            "Content-Range",
            format!("bytes {start}-{end}/{total_size}").parse().unwrap(),
        );
    }
    Ok(response)
}

/// Parses a single-range `Range: bytes=a-b` header. Multi-range requests
/// are not supported; only the first range is honoured.
fn parse_range(header: &str) -> Option<(u64, Option<u64>)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = if start.is_empty() { 0 } else { start.parse().ok()? };
    let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
    Some((start, end))
}
