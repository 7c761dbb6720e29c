//! Wire protocol for the signaling channel (§6). A closed sum of message
//! variants, tagged on `type`; unknown variants are rejected at the serde
//! layer rather than accepted as a dynamic dictionary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, VideoId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub user_id: ParticipantId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSummary {
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub playing: bool,
    /// Fraction of duration in `[0, 1]`.
    pub position: f64,
    pub speed: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            playing: false,
            position: 0.0,
            speed: 1.0,
        }
    }
}

/// Messages a participant sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        user_id: ParticipantId,
        username: String,
    },
    Play {
        position: f64,
    },
    Pause {
        position: f64,
    },
    Seek {
        position: f64,
    },
    Speed {
        speed: f64,
    },
    PlayVideo {
        video_id: VideoId,
    },
    Ready {
        video_id: VideoId,
    },
    Kick {
        target_user_id: ParticipantId,
    },
    SetSharedPool {
        enabled: bool,
    },
    RequestRandom {},
    Ping {},
}

/// Messages the server sends to a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomState {
        users: Vec<UserSummary>,
        playback_state: PlaybackState,
        current_video: Option<VideoId>,
        host_id: ParticipantId,
        videos: HashMap<VideoId, VideoSummary>,
    },
    UserJoined {
        user_id: ParticipantId,
        username: String,
        users: Vec<UserSummary>,
    },
    UserLeft {
        user_id: ParticipantId,
        username: String,
        users: Vec<UserSummary>,
    },
    UserKicked {
        username: String,
        kicked_by: String,
        users: Vec<UserSummary>,
    },
    Kicked {
        message: String,
    },
    Play {
        position: f64,
        user: ParticipantId,
        timestamp: f64,
    },
    Pause {
        position: f64,
        user: ParticipantId,
        timestamp: f64,
    },
    Seek {
        position: f64,
        user: ParticipantId,
        timestamp: f64,
    },
    Speed {
        speed: f64,
        user: ParticipantId,
    },
    PrepareVideo {
        video_id: VideoId,
        filename: String,
        user: ParticipantId,
        timestamp: f64,
    },
    AllReady {
        video_id: VideoId,
    },
    ReadyProgress {
        video_id: VideoId,
        ready: usize,
        total: usize,
    },
    VideoUploaded {
        video_id: VideoId,
        filename: String,
        size: u64,
        uploaded_by: ParticipantId,
    },
    ProvideRandomClip {
        requested_by: ParticipantId,
    },
    SharedPoolChanged {
        enabled: bool,
        changed_by: ParticipantId,
    },
    Pong {},
    Error {
        message: String,
    },
}
