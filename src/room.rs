use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;

use crate::blob_store::BlobStore;
use crate::config::READY_SYNC_TIMEOUT;
use crate::ids::{ParticipantId, RoomCode, VideoId};
use crate::participant::Participant;
use crate::protocol::{PlaybackState, ServerMessage, UserSummary, VideoSummary};

#[derive(Debug, Clone)]
pub struct VideoEntry {
    pub original_filename: String,
    pub stored_filename: String,
    pub size: u64,
    pub uploader_id: ParticipantId,
    pub uploaded_at: Instant,
}

/// A snapshot of room state handed to a participant on join (§4.B `join`).
pub struct RoomSnapshot {
    pub users: Vec<UserSummary>,
    pub playback_state: PlaybackState,
    pub current_video: Option<VideoId>,
    pub host_id: ParticipantId,
    pub videos: HashMap<VideoId, VideoSummary>,
}

/// An action the room wants its caller to perform after the lock is
/// released: schedule a ready-sync timeout. Keeps the internal `Mutex` from
/// ever being held across an await.
pub enum RoomEffect {
    ScheduleReadySyncTimeout(VideoId),
}

/// The unit of a shared watch session (§3). Cheap to clone; clones share the
/// same underlying state, mirroring the teacher's `Arc<Shared>` room handle.
#[derive(Clone)]
pub struct Room {
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct WeakRoom {
    shared: Weak<Shared>,
}

struct Shared {
    code: RoomCode,
    password_digest: String,
    host_id: ParticipantId,
    created_at: Instant,
    blob_store: BlobStore,
    state: Mutex<State>,
    /// Fired once, with a close reason, when the registry reaps this room
    /// (§4.A `sweep`: "closing their channels with a close-reason of
    /// 'expired'"). Lazily subscribed by each connected channel.
    closed: tokio::sync::broadcast::Sender<String>,
}

struct State {
    participants: HashMap<ParticipantId, Participant>,
    catalogue: HashMap<VideoId, VideoEntry>,
    playback_state: PlaybackState,
    active_video: Option<VideoId>,
    pending_video: Option<VideoId>,
    ready_set: HashSet<ParticipantId>,
    shared_pool_enabled: bool,
    last_activity: Instant,
}

impl Room {
    pub fn new(
        code: RoomCode,
        password_digest: String,
        host_id: ParticipantId,
        blob_store: BlobStore,
    ) -> Self {
        let (closed, _) = tokio::sync::broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                code,
                password_digest,
                host_id,
                created_at: Instant::now(),
                blob_store,
                closed,
                state: Mutex::new(State {
                    participants: HashMap::new(),
                    catalogue: HashMap::new(),
                    playback_state: PlaybackState::default(),
                    active_video: None,
                    pending_video: None,
                    ready_set: HashSet::new(),
                    shared_pool_enabled: false,
                    last_activity: Instant::now(),
                }),
            }),
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.shared.code
    }
    pub fn host_id(&self) -> ParticipantId {
        self.shared.host_id
    }
    pub fn created_at(&self) -> Instant {
        self.shared.created_at
    }
    pub fn blob_store(&self) -> &BlobStore {
        &self.shared.blob_store
    }
    pub fn downgrade(&self) -> WeakRoom {
        WeakRoom {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.shared.password_digest).unwrap_or(false)
    }

    pub fn last_activity(&self) -> Instant {
        self.shared.state.lock().unwrap().last_activity
    }

    pub fn is_expired(&self, now: Instant, expiry: Duration) -> bool {
        now.duration_since(self.last_activity()) > expiry
    }

    fn touch(state: &mut State) {
        state.last_activity = Instant::now();
    }

    /// A read-only snapshot of current state, as returned by the HTTP join
    /// endpoint before a signaling channel exists for the caller (§6).
    pub fn peek(&self) -> RoomSnapshot {
        let state = self.shared.state.lock().unwrap();
        Self::snapshot_locked(&state, self.shared.host_id)
    }

    fn snapshot_locked(state: &State, host_id: ParticipantId) -> RoomSnapshot {
        RoomSnapshot {
            users: Self::user_list(state),
            playback_state: state.playback_state.clone(),
            current_video: state.pending_video.or(state.active_video),
            host_id,
            videos: state
                .catalogue
                .iter()
                .map(|(id, entry)| {
                    (
                        *id,
                        VideoSummary {
                            filename: entry.original_filename.clone(),
                            size: entry.size,
                        },
                    )
                })
                .collect(),
        }
    }

    /// §4.B `join`.
    pub fn join(
        &self,
        id: ParticipantId,
        username: String,
        outbound: tokio::sync::mpsc::UnboundedSender<ServerMessage>,
    ) -> RoomSnapshot {
        let mut state = self.shared.state.lock().unwrap();
        let participant = Participant::new(id, username.clone(), outbound);
        state.participants.insert(id, participant);
        Self::touch(&mut state);

        let snapshot = Self::snapshot_locked(&state, self.shared.host_id);
        let users = snapshot.users.clone();

        Self::fan_out(
            &mut state,
            None,
            ServerMessage::UserJoined {
                user_id: id,
                username,
                users,
            },
        );

        snapshot
    }

    /// §4.B `leave`. Returns `true` if a ready-sync barrier committed as a
    /// result of this departure.
    pub fn leave(&self, id: ParticipantId) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let Some(participant) = state.participants.remove(&id) else {
            return false;
        };
        state.ready_set.remove(&id);
        Self::touch(&mut state);

        let users = Self::user_list(&state);
        Self::fan_out(
            &mut state,
            None,
            ServerMessage::UserLeft {
                user_id: id,
                username: participant.username,
                users,
            },
        );

        Self::try_commit(&mut state)
    }

    /// §4.B `apply` — a playback event originated by `from`. Fans out to
    /// every other participant, never back to `from` (echo suppression,
    /// §4.E, §8 invariant 6).
    pub fn apply_play(&self, from: ParticipantId, position: f64) {
        let mut state = self.shared.state.lock().unwrap();
        state.playback_state.position = position;
        // Invariant 1: never playing while a barrier is pending.
        state.playback_state.playing = state.pending_video.is_none();
        Self::touch(&mut state);
        let timestamp = unix_timestamp();
        Self::fan_out(
            &mut state,
            Some(from),
            ServerMessage::Play {
                position,
                user: from,
                timestamp,
            },
        );
    }

    pub fn apply_pause(&self, from: ParticipantId, position: f64) {
        let mut state = self.shared.state.lock().unwrap();
        state.playback_state.position = position;
        state.playback_state.playing = false;
        Self::touch(&mut state);
        let timestamp = unix_timestamp();
        Self::fan_out(
            &mut state,
            Some(from),
            ServerMessage::Pause {
                position,
                user: from,
                timestamp,
            },
        );
    }

    pub fn apply_seek(&self, from: ParticipantId, position: f64) {
        let mut state = self.shared.state.lock().unwrap();
        state.playback_state.position = position;
        Self::touch(&mut state);
        let timestamp = unix_timestamp();
        Self::fan_out(
            &mut state,
            Some(from),
            ServerMessage::Seek {
                position,
                user: from,
                timestamp,
            },
        );
    }

    pub fn apply_speed(&self, from: ParticipantId, speed: f64) {
        let mut state = self.shared.state.lock().unwrap();
        state.playback_state.speed = speed;
        Self::touch(&mut state);
        Self::fan_out(&mut state, Some(from), ServerMessage::Speed { speed, user: from });
    }

    /// §4.B `shareVideo` / §4.F: enters `SYNCING`, or commits immediately if
    /// `from` is the only participant. Returns an effect the caller must act
    /// on (schedule the barrier timeout) when one is produced.
    pub fn share_video(&self, video_id: VideoId, from: ParticipantId) -> Option<RoomEffect> {
        let mut state = self.shared.state.lock().unwrap();
        state.pending_video = Some(video_id);
        state.playback_state.playing = false;
        state.playback_state.position = 0.0;
        state.ready_set = HashSet::from([from]);
        Self::touch(&mut state);

        let filename = state
            .catalogue
            .get(&video_id)
            .map(|e| e.original_filename.clone())
            .unwrap_or_default();
        let timestamp = unix_timestamp();
        Self::fan_out(
            &mut state,
            Some(from),
            ServerMessage::PrepareVideo {
                video_id,
                filename,
                user: from,
                timestamp,
            },
        );

        if Self::try_commit(&mut state) {
            None
        } else {
            Some(RoomEffect::ScheduleReadySyncTimeout(video_id))
        }
    }

    /// §4.B `markReady`.
    pub fn mark_ready(&self, id: ParticipantId, video_id: VideoId) {
        let mut state = self.shared.state.lock().unwrap();
        if state.pending_video != Some(video_id) {
            return;
        }
        state.ready_set.insert(id);
        Self::touch(&mut state);

        let ready = state.ready_set.len();
        let total = state.participants.len();
        Self::fan_out(
            &mut state,
            None,
            ServerMessage::ReadyProgress {
                video_id,
                ready,
                total,
            },
        );

        Self::try_commit(&mut state);
    }

    /// Fired by the scheduled barrier timeout (§4.F). Idempotent: a no-op if
    /// the barrier already committed via readiness or a newer `shareVideo`.
    pub fn force_commit_if_still_pending(&self, video_id: VideoId) {
        let mut state = self.shared.state.lock().unwrap();
        if state.pending_video != Some(video_id) {
            return;
        }
        Self::commit(&mut state);
    }

    fn try_commit(state: &mut State) -> bool {
        if state.pending_video.is_none() {
            return false;
        }
        let all_ready = state
            .participants
            .keys()
            .all(|id| state.ready_set.contains(id));
        if all_ready {
            Self::commit(state);
            true
        } else {
            false
        }
    }

    fn commit(state: &mut State) {
        let Some(video_id) = state.pending_video.take() else {
            return;
        };
        state.active_video = Some(video_id);
        state.ready_set.clear();
        state.playback_state.playing = true;
        state.playback_state.position = 0.0;
        Self::touch(state);
        Self::fan_out(state, None, ServerMessage::AllReady { video_id });
    }

    /// §4.B `kick`. Errs with a message for an explicit error reply when the
    /// requester is not the host.
    pub fn kick(&self, requester: ParticipantId, target: ParticipantId) -> Result<(), String> {
        if requester != self.shared.host_id {
            return Err("Only the host can kick users".to_string());
        }
        let mut state = self.shared.state.lock().unwrap();
        let Some(target_participant) = state.participants.remove(&target) else {
            return Ok(());
        };
        state.ready_set.remove(&target);
        let host_username = state
            .participants
            .get(&requester)
            .map(|p| p.username.clone())
            .unwrap_or_default();

        let _ = target_participant.send(ServerMessage::Kicked {
            message: format!("You were kicked by {host_username}"),
        });

        let users = Self::user_list(&state);
        Self::fan_out(
            &mut state,
            None,
            ServerMessage::UserKicked {
                username: target_participant.username,
                kicked_by: host_username,
                users,
            },
        );
        Self::touch(&mut state);
        Self::try_commit(&mut state);
        Ok(())
    }

    /// §4.B `setSharedPool`.
    pub fn set_shared_pool(&self, requester: ParticipantId, enabled: bool) -> Result<(), String> {
        if requester != self.shared.host_id {
            return Err("only the host can change the shared pool setting".to_string());
        }
        let mut state = self.shared.state.lock().unwrap();
        state.shared_pool_enabled = enabled;
        Self::touch(&mut state);
        Self::fan_out(
            &mut state,
            None,
            ServerMessage::SharedPoolChanged {
                enabled,
                changed_by: requester,
            },
        );
        Ok(())
    }

    /// §4.B `requestRandom`. Delegates to a uniformly-chosen participant
    /// (possibly `from` itself) when the shared pool is enabled; otherwise
    /// bounces the directive back to `from`.
    pub fn request_random(&self, from: ParticipantId) {
        let mut state = self.shared.state.lock().unwrap();
        let target = if state.shared_pool_enabled && !state.participants.is_empty() {
            *state
                .participants
                .keys()
                .choose(&mut rand::thread_rng())
                .unwrap()
        } else {
            from
        };
        if let Some(participant) = state.participants.get(&target) {
            let _ = participant.send(ServerMessage::ProvideRandomClip { requested_by: from });
        }
        Self::touch(&mut state);
    }

    /// Records an accepted upload in the catalogue and broadcasts
    /// `video_uploaded` to every participant, including the uploader (§4.E).
    pub fn record_video(&self, video_id: VideoId, entry: VideoEntry) {
        let mut state = self.shared.state.lock().unwrap();
        let message = ServerMessage::VideoUploaded {
            video_id,
            filename: entry.original_filename.clone(),
            size: entry.size,
            uploaded_by: entry.uploader_id,
        };
        state.catalogue.insert(video_id, entry);
        Self::touch(&mut state);
        Self::fan_out(&mut state, None, message);
    }

    /// Subscribes to this room's close signal (§4.A `sweep`). Each
    /// connected channel holds its own receiver so it can react to reaping
    /// without polling `Registry`.
    pub fn subscribe_closed(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.shared.closed.subscribe()
    }

    /// Closes every connected channel with `reason` (§4.A `sweep`). A no-op
    /// on channels that already disconnected; does not itself remove
    /// participants from `participants` — each channel's own task does that
    /// via `leave` as it unwinds.
    pub fn close_all(&self, reason: &str) {
        let _ = self.shared.closed.send(reason.to_string());
    }

    /// Send a message to a single participant, e.g. an explicit error reply
    /// to a rejected host-only action (§4.B failure semantics). No-op if the
    /// participant is no longer a member.
    pub fn send_to(&self, id: ParticipantId, message: ServerMessage) {
        let state = self.shared.state.lock().unwrap();
        if let Some(participant) = state.participants.get(&id) {
            let _ = participant.send(message);
        }
    }

    pub fn is_member(&self, id: ParticipantId) -> bool {
        self.shared.state.lock().unwrap().participants.contains_key(&id)
    }

    pub fn participant_count(&self) -> usize {
        self.shared.state.lock().unwrap().participants.len()
    }

    pub fn video_stored_filename(&self, video_id: VideoId) -> Option<String> {
        self.shared
            .state
            .lock()
            .unwrap()
            .catalogue
            .get(&video_id)
            .map(|e| e.stored_filename.clone())
    }

    fn user_list(state: &State) -> Vec<UserSummary> {
        state
            .participants
            .values()
            .map(|p| UserSummary {
                user_id: p.id,
                username: p.username.clone(),
            })
            .collect()
    }

    /// Fan out `message` to every participant except `exclude`, if given. A
    /// send failure marks that participant for removal; the event is still
    /// considered applied for the room (§4.B failure semantics).
    fn fan_out(state: &mut State, exclude: Option<ParticipantId>, message: ServerMessage) {
        let mut dead = Vec::new();
        for (id, participant) in state.participants.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if participant.send(message.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            state.participants.remove(&id);
            state.ready_set.remove(&id);
        }
    }
}

impl WeakRoom {
    pub fn upgrade(&self) -> Option<Room> {
        self.shared.upgrade().map(|shared| Room { shared })
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        log::debug!("dropped room {}", self.code);
    }
}

fn unix_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Spawns the scheduled one-shot barrier timeout for `pending_video` (§4.F,
/// §9: "scheduled one-shot task ... idempotent fire-and-check pattern").
pub fn schedule_ready_sync_timeout(room: &Room, video_id: VideoId) {
    let weak = room.downgrade();
    tokio::spawn(async move {
        tokio::time::sleep(READY_SYNC_TIMEOUT).await;
        if let Some(room) = weak.upgrade() {
            room.force_commit_if_still_pending(video_id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_room() -> (Room, ParticipantId) {
        let blob_store = BlobStore::new_for_test();
        let host_id = ParticipantId::new();
        let room = Room::new(
            RoomCode::from("TEST"),
            bcrypt::hash("pw", 4).unwrap(),
            host_id,
            blob_store,
        );
        (room, host_id)
    }

    fn channel() -> (
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn sole_participant_share_commits_immediately() {
        let (room, host_id) = test_room();
        let (tx, _rx) = channel();
        room.join(host_id, "Alice".into(), tx);

        let video_id = VideoId::new();
        let effect = room.share_video(video_id, host_id);
        assert!(effect.is_none());
    }

    #[test]
    fn second_participant_blocks_commit_until_ready() {
        let (room, host_id) = test_room();
        let (tx1, _rx1) = channel();
        let (tx2, mut rx2) = channel();
        room.join(host_id, "Alice".into(), tx1);
        let bob = ParticipantId::new();
        room.join(bob, "Bob".into(), tx2);

        let video_id = VideoId::new();
        let effect = room.share_video(video_id, host_id);
        assert!(effect.is_some());

        let got_prepare = std::iter::from_fn(|| rx2.try_recv().ok())
            .any(|m| matches!(m, ServerMessage::PrepareVideo { .. }));
        assert!(got_prepare);

        room.mark_ready(bob, video_id);
        let got_all_ready = std::iter::from_fn(|| rx2.try_recv().ok())
            .any(|m| matches!(m, ServerMessage::AllReady { .. }));
        assert!(got_all_ready);
    }

    #[test]
    fn late_joiner_sees_pending_video_as_current() {
        let (room, host_id) = test_room();
        let (tx1, _rx1) = channel();
        room.join(host_id, "Alice".into(), tx1);
        let video_id = VideoId::new();
        room.share_video(video_id, host_id);

        let bob = ParticipantId::new();
        let (tx2, _rx2) = channel();
        let snapshot = room.join(bob, "Bob".into(), tx2);
        assert_eq!(snapshot.current_video, Some(video_id));
    }

    #[test]
    fn non_host_kick_is_rejected() {
        let (room, host_id) = test_room();
        let (tx1, _rx1) = channel();
        room.join(host_id, "Alice".into(), tx1);
        let bob = ParticipantId::new();
        let (tx2, _rx2) = channel();
        room.join(bob, "Bob".into(), tx2);

        let result = room.kick(bob, host_id);
        assert!(result.is_err());
        assert!(room.is_member(host_id));
    }

    #[test]
    fn leave_during_syncing_can_commit_barrier() {
        let (room, host_id) = test_room();
        let (tx1, _rx1) = channel();
        room.join(host_id, "Alice".into(), tx1);
        let bob = ParticipantId::new();
        let (tx2, _rx2) = channel();
        room.join(bob, "Bob".into(), tx2);

        let video_id = VideoId::new();
        room.share_video(video_id, host_id);
        // Bob never signals ready, but leaves: ready_set (Alice) now covers
        // the remaining participant set, so the barrier commits.
        let committed = room.leave(bob);
        assert!(committed);
    }
}
