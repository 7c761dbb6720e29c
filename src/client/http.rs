//! HTTP calls the Session Client makes against the HTTP Surface (§6):
//! create-room and join-room. Upload and download live in their own
//! modules since they stream bodies rather than exchanging a single JSON
//! request/response.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RdmError;
use crate::ids::{ParticipantId, RoomCode, VideoId};
use crate::protocol::{PlaybackState, UserSummary, VideoSummary};

use super::SessionClient;

#[derive(Serialize)]
struct CreateRoomRequest<'a> {
    password: &'a str,
    username: &'a str,
}

#[derive(Deserialize)]
struct CreateRoomResponse {
    room_code: String,
    #[allow(dead_code)]
    user_id: ParticipantId,
    host_id: ParticipantId,
}

#[derive(Serialize)]
struct JoinRoomRequest<'a> {
    password: &'a str,
    username: &'a str,
}

#[derive(Deserialize)]
pub struct JoinRoomResponse {
    pub room_code: String,
    pub user_id: ParticipantId,
    pub host_id: ParticipantId,
    pub users: Vec<UserSummary>,
    pub playback_state: PlaybackState,
    pub current_video: Option<VideoId>,
    pub videos: HashMap<VideoId, VideoSummary>,
}

/// Maps a non-2xx HTTP response onto the crate's error taxonomy (§7), so
/// the caller doesn't need to know about status codes.
fn error_for_status(status: reqwest::StatusCode) -> RdmError {
    match status {
        reqwest::StatusCode::NOT_FOUND => RdmError::NotFound,
        reqwest::StatusCode::FORBIDDEN => RdmError::AuthFailure,
        reqwest::StatusCode::TOO_MANY_REQUESTS => RdmError::RateLimited,
        reqwest::StatusCode::PAYLOAD_TOO_LARGE => RdmError::PayloadTooLarge,
        reqwest::StatusCode::BAD_REQUEST => RdmError::MalformedInput("bad request".into()),
        _ => RdmError::Transient,
    }
}

impl SessionClient {
    /// Creates a new room and immediately joins it as host, per §4.G /
    /// S1. Opens the signaling channel and returns once `room_state` has
    /// been received (the caller's `ClientEvent` stream then carries
    /// everything else).
    pub async fn create_room(&self, password: String, username: String) -> Result<RoomCode, RdmError> {
        let url = format!("{}/rooms", self.base_url_owned());
        let resp = self
            .http_client()
            .post(&url)
            .json(&CreateRoomRequest {
                password: &password,
                username: &username,
            })
            .send()
            .await
            .map_err(|_| RdmError::Transient)?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp.status()));
        }
        let body: CreateRoomResponse = resp.json().await.map_err(|_| RdmError::Transient)?;
        let code = RoomCode::from(body.room_code);

        self.set_room_context(code.clone(), password, username, body.host_id);
        self.set_host_id(body.host_id);
        super::ws::spawn_channel(self.clone(), code.clone());
        Ok(code)
    }

    /// Joins an existing room (§4.G / fresh call on every (re)connect per
    /// the Open Question in §9). On success, (re)opens the signaling
    /// channel.
    pub async fn join_room(&self, code: RoomCode, password: String, username: String) -> Result<(), RdmError> {
        let body = self.join_room_http(&code, &password, &username).await?;
        self.set_room_context(code.clone(), password, username, body.user_id);
        self.set_host_id(body.host_id);
        self.set_playback_state(body.playback_state, body.current_video);
        self.merge_catalogue(body.videos);
        super::ws::spawn_channel(self.clone(), code);
        Ok(())
    }

    /// The bare HTTP call, without side effects on client state — used
    /// both by [`join_room`] and by the reconnection policy in `ws.rs`,
    /// which re-POSTs this endpoint with the remembered credentials to
    /// obtain a fresh `user_id` (§4.G, §9 Open Question).
    pub(crate) async fn join_room_http(
        &self,
        code: &RoomCode,
        password: &str,
        username: &str,
    ) -> Result<JoinRoomResponse, RdmError> {
        let url = format!("{}/rooms/{}/join", self.base_url_owned(), code);
        let resp = self
            .http_client()
            .post(&url)
            .json(&JoinRoomRequest { password, username })
            .send()
            .await
            .map_err(|_| RdmError::Transient)?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp.status()));
        }
        resp.json().await.map_err(|_| RdmError::Transient)
    }
}
