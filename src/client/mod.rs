//! Session Client (§4.G): the peer-side complement to the server. Drives
//! HTTP create/join, owns the signaling channel's lifecycle (auth, ping,
//! reconnection), and ferries media in and out of the room via upload and
//! download. Talks to its host application only through the external
//! collaborators named in §1 — a [`MediaController`], a [`ClipLibrary`],
//! and a stream of [`ClientEvent`]s — so it can be linked independently of
//! the server binary (§9, `random_clip_player.py`'s lazy import).

pub mod download;
pub mod http;
pub mod upload;
pub mod ws;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::ids::{ParticipantId, RoomCode, VideoId};
use crate::protocol::{ClientMessage, PlaybackState};

/// A local video playback surface. Out of scope per §1; the Session Client
/// only ever calls these operations, never implements them.
pub trait MediaController: Send + Sync {
    fn load(&self, path: &std::path::Path);
    fn play(&self);
    fn pause(&self);
    fn seek(&self, fraction: f64);
    fn set_rate(&self, rate: f64);
    fn position(&self) -> f64;
    fn is_playing(&self) -> bool;
    fn ended(&self) -> bool;
}

/// A local clip library yielding a random file path on demand (§1).
pub trait ClipLibrary: Send + Sync {
    fn random_clip(&self) -> Option<PathBuf>;
}

/// Everything the Session Client reports to its UI layer. This is the
/// single-direction notification channel described in §9 as the Rust
/// analogue of the source's Qt signals.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    RoomJoined {
        room_code: RoomCode,
        user_id: ParticipantId,
        host_id: ParticipantId,
    },
    UserJoined {
        user_id: ParticipantId,
        username: String,
    },
    UserLeft {
        user_id: ParticipantId,
        username: String,
    },
    Kicked {
        message: String,
    },
    UserKicked {
        username: String,
        kicked_by: String,
    },
    ReadyProgress {
        video_id: VideoId,
        ready: usize,
        total: usize,
    },
    AllReady {
        video_id: VideoId,
    },
    SharedPoolChanged {
        enabled: bool,
    },
    VideoUploaded {
        video_id: VideoId,
        filename: String,
        size: u64,
    },
    UploadProgress {
        fraction: f64,
    },
    DownloadProgress {
        video_id: VideoId,
        fraction: f64,
    },
    VideoReady {
        video_id: VideoId,
        path: PathBuf,
    },
    Latency {
        millis: f64,
    },
    Reconnected,
    Disconnected,
    RoomError {
        message: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CatalogueEntry {
    pub original_filename: String,
    pub local_path: Option<PathBuf>,
}

pub(crate) struct State {
    pub room_code: Option<RoomCode>,
    pub password: String,
    pub username: String,
    pub user_id: ParticipantId,
    pub host_id: ParticipantId,
    pub catalogue: HashMap<VideoId, CatalogueEntry>,
    pub playback_state: PlaybackState,
    pub current_video: Option<VideoId>,
    /// Outbound sender into the live write half of the signaling channel.
    /// Replaced on every (re)connect; `None` while disconnected.
    pub outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    /// Set by [`SessionClient::disconnect`] so the read loop's closure is
    /// not mistaken for a transient drop that should trigger reconnection.
    pub intentional_disconnect: bool,
    /// Raised only for the synchronous span of applying one remote-sourced
    /// event to the media controller (§4.G echo suppression, §5).
    pub ignore_remote: bool,
    pub download_dir: PathBuf,
}

struct Shared {
    http: reqwest::Client,
    base_url: String,
    media: Arc<dyn MediaController>,
    library: Arc<dyn ClipLibrary>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    state: Mutex<State>,
}

/// The client-side session coordinator (§4.G). Cheap to clone; every clone
/// shares the same underlying connection and state, mirroring `Room`'s and
/// `Session`'s `Arc<Shared>` handle pattern in the server half of this
/// crate.
#[derive(Clone)]
pub struct SessionClient {
    shared: Arc<Shared>,
}

impl SessionClient {
    pub fn new(
        base_url: impl Into<String>,
        media: Arc<dyn MediaController>,
        library: Arc<dyn ClipLibrary>,
        download_dir: PathBuf,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Self {
            shared: Arc::new(Shared {
                http: reqwest::Client::new(),
                base_url: base_url.into(),
                media,
                library,
                events_tx,
                state: Mutex::new(State {
                    room_code: None,
                    password: String::new(),
                    username: String::new(),
                    user_id: ParticipantId::new(),
                    host_id: ParticipantId::new(),
                    catalogue: HashMap::new(),
                    playback_state: PlaybackState::default(),
                    current_video: None,
                    outbound: None,
                    intentional_disconnect: false,
                    ignore_remote: false,
                    download_dir,
                }),
            }),
        };
        (client, events_rx)
    }

    pub fn room_code(&self) -> Option<RoomCode> {
        self.shared.state.lock().unwrap().room_code.clone()
    }

    pub fn user_id(&self) -> ParticipantId {
        self.shared.state.lock().unwrap().user_id
    }

    pub fn host_id(&self) -> ParticipantId {
        self.shared.state.lock().unwrap().host_id
    }

    pub fn is_host(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.user_id == state.host_id
    }

    /// Sends a message over the live signaling channel, if connected.
    /// Silently dropped while disconnected (§4.G reconnection absorbs the
    /// gap; nothing re-sends a queued message once reconnected, matching
    /// the source's reconnect-then-resubscribe behaviour rather than a
    /// durable outbox). Also silently dropped while a remote-sourced event
    /// is being applied to the media controller (`apply_remote`), so the
    /// local callback that fires as a side effect of that application
    /// doesn't re-broadcast the event the room just sent us.
    fn send(&self, message: ClientMessage) {
        if self.is_ignoring_remote() {
            return;
        }
        let outbound = self.shared.state.lock().unwrap().outbound.clone();
        if let Some(outbound) = outbound {
            let _ = outbound.send(message);
        }
    }

    pub fn play(&self, position: f64) {
        self.send(ClientMessage::Play { position });
    }
    pub fn pause(&self, position: f64) {
        self.send(ClientMessage::Pause { position });
    }
    pub fn seek(&self, position: f64) {
        self.send(ClientMessage::Seek { position });
    }
    pub fn set_speed(&self, speed: f64) {
        self.send(ClientMessage::Speed { speed });
    }
    pub fn mark_ready(&self, video_id: VideoId) {
        self.send(ClientMessage::Ready { video_id });
    }
    pub fn kick(&self, target_user_id: ParticipantId) {
        self.send(ClientMessage::Kick { target_user_id });
    }
    pub fn set_shared_pool(&self, enabled: bool) {
        self.send(ClientMessage::SetSharedPool { enabled });
    }
    pub fn request_random(&self) {
        self.send(ClientMessage::RequestRandom {});
    }

    /// Announces an already-uploaded clip to the room, entering ready-sync.
    pub fn play_video(&self, video_id: VideoId) {
        self.send(ClientMessage::PlayVideo { video_id });
    }

    /// Disconnects intentionally: the next channel close will not trigger
    /// the reconnect policy (§5 "a client-initiated disconnect cancels the
    /// ping loop and the reconnect timer before closing the channel").
    pub fn disconnect(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.intentional_disconnect = true;
        state.outbound = None;
    }
}

/// Internal helpers shared by the `http`, `ws`, `upload`, and `download`
/// submodules.
impl SessionClient {
    fn media(&self) -> Arc<dyn MediaController> {
        self.shared.media.clone()
    }

    fn library(&self) -> Arc<dyn ClipLibrary> {
        self.shared.library.clone()
    }

    pub(crate) fn local_path(&self, video_id: VideoId) -> Option<PathBuf> {
        self.shared
            .state
            .lock()
            .unwrap()
            .catalogue
            .get(&video_id)
            .and_then(|entry| entry.local_path.clone())
    }

    pub(crate) fn download_path_for(&self, video_id: VideoId) -> PathBuf {
        let state = self.shared.state.lock().unwrap();
        state.download_dir.join(video_id.to_string())
    }

    pub(crate) fn record_local_path(&self, video_id: VideoId, path: PathBuf, filename: &str) {
        let mut state = self.shared.state.lock().unwrap();
        let entry = state.catalogue.entry(video_id).or_insert_with(|| CatalogueEntry {
            original_filename: filename.to_string(),
            local_path: None,
        });
        entry.local_path = Some(path);
    }

    /// Applies a remote-sourced playback event to the local media
    /// controller with [`State::ignore_remote`] raised for the duration of
    /// the call, so the resulting local callback does not re-broadcast
    /// (§4.G echo suppression).
    pub(crate) fn apply_remote<F: FnOnce(&dyn MediaController)>(&self, f: F) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.ignore_remote = true;
        }
        f(self.media().as_ref());
        let mut state = self.shared.state.lock().unwrap();
        state.ignore_remote = false;
    }

    pub(crate) fn is_ignoring_remote(&self) -> bool {
        self.shared.state.lock().unwrap().ignore_remote
    }

    pub(crate) fn set_room_context(&self, code: RoomCode, password: String, username: String, user_id: ParticipantId) {
        let mut state = self.shared.state.lock().unwrap();
        state.room_code = Some(code);
        state.password = password;
        state.username = username;
        state.user_id = user_id;
    }

    pub(crate) fn room_credentials(&self) -> (String, String) {
        let state = self.shared.state.lock().unwrap();
        (state.password.clone(), state.username.clone())
    }

    pub(crate) fn set_outbound(&self, outbound: Option<mpsc::UnboundedSender<ClientMessage>>) {
        self.shared.state.lock().unwrap().outbound = outbound;
    }

    pub(crate) fn take_intentional_disconnect(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        std::mem::replace(&mut state.intentional_disconnect, false)
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.shared.events_tx.send(event);
    }

    pub(crate) fn base_url_owned(&self) -> String {
        self.shared.base_url.clone()
    }

    pub(crate) fn http_client(&self) -> reqwest::Client {
        self.shared.http.clone()
    }

    pub(crate) fn set_host_id(&self, host_id: ParticipantId) {
        self.shared.state.lock().unwrap().host_id = host_id;
    }

    pub(crate) fn set_playback_state(&self, playback_state: PlaybackState, current_video: Option<VideoId>) {
        let mut state = self.shared.state.lock().unwrap();
        state.playback_state = playback_state;
        state.current_video = current_video;
    }

    pub(crate) fn playback_state(&self) -> PlaybackState {
        self.shared.state.lock().unwrap().playback_state.clone()
    }

    pub(crate) fn current_video(&self) -> Option<VideoId> {
        self.shared.state.lock().unwrap().current_video
    }

    /// Merges the room's catalogue summary (from `room_state`) into the
    /// local view, preserving any `local_path` already recorded.
    pub(crate) fn merge_catalogue(&self, videos: HashMap<VideoId, crate::protocol::VideoSummary>) {
        let mut state = self.shared.state.lock().unwrap();
        for (video_id, summary) in videos {
            state
                .catalogue
                .entry(video_id)
                .or_insert_with(|| CatalogueEntry {
                    original_filename: summary.filename.clone(),
                    local_path: None,
                })
                .original_filename = summary.filename;
        }
    }

    pub(crate) fn note_uploaded(&self, video_id: VideoId, filename: String, local_path: Option<PathBuf>) {
        let mut state = self.shared.state.lock().unwrap();
        state.catalogue.insert(video_id, CatalogueEntry {
            original_filename: filename,
            local_path,
        });
    }
}
