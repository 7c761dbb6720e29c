//! Drives the signaling channel end to end on the client side: connect,
//! `auth`, a read-dispatch loop paired with a serialized write task and a
//! ping loop, and the reconnection policy on unexpected closure (§4.G, §5).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::{PING_INTERVAL, RECONNECT_BACKOFF_SECONDS};
use crate::error::RdmError;
use crate::ids::{ParticipantId, RoomCode, VideoId};
use crate::protocol::{ClientMessage, PlaybackState, ServerMessage};

use super::{ClientEvent, SessionClient};

/// Spawns the channel's lifetime task: connect, run until closed, and
/// either stop (intentional disconnect, or being kicked) or reconnect
/// per §4.G's backoff schedule.
pub(crate) fn spawn_channel(client: SessionClient, code: RoomCode) {
    tokio::spawn(async move {
        run(client, code).await;
    });
}

async fn run(client: SessionClient, mut code: RoomCode) {
    let mut is_initial = true;
    loop {
        let unexpected_close = run_once(&client, &code, is_initial).await;
        is_initial = false;
        if !unexpected_close {
            break;
        }
        match reconnect(&client, &code).await {
            Some(new_code) => {
                code = new_code;
                client.emit(ClientEvent::Reconnected);
            }
            None => {
                client.emit(ClientEvent::Disconnected);
                break;
            }
        }
    }
}

/// Runs one connection's lifetime. Returns `true` if the channel closed
/// unexpectedly (the caller should attempt reconnection), `false` if this
/// was an intentional disconnect or an eviction (`kicked`).
async fn run_once(client: &SessionClient, code: &RoomCode, is_initial: bool) -> bool {
    let url = websocket_url(&client.base_url_owned(), code);
    let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
        Ok(pair) => pair,
        Err(_) => return true,
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let user_id = client.user_id();
    let (_, username) = client.room_credentials();
    if send_json(&mut ws_tx, &ClientMessage::Auth { user_id, username }).await.is_err() {
        return true;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
    client.set_outbound(Some(outbound_tx.clone()));

    let write_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if send_json(&mut ws_tx, &message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let last_ping = Arc::new(Mutex::new(None::<Instant>));
    let ping_task = {
        let ping_tx = outbound_tx.clone();
        let last_ping = last_ping.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                *last_ping.lock().unwrap() = Some(Instant::now());
                if ping_tx.send(ClientMessage::Ping {}).is_err() {
                    break;
                }
            }
        })
    };

    let mut kicked = false;
    while let Some(Ok(message)) = ws_rx.next().await {
        let WsMessage::Text(text) = message else { continue };
        let Ok(server_message) = serde_json::from_str::<ServerMessage>(&text) else {
            continue;
        };
        if handle_server_message(client, code, server_message, &last_ping, is_initial).await {
            kicked = true;
            break;
        }
    }

    ping_task.abort();
    client.set_outbound(None);
    drop(outbound_tx);
    let _ = write_task.await;

    if kicked {
        client.disconnect();
        false
    } else if client.take_intentional_disconnect() {
        false
    } else {
        true
    }
}

/// Applies one inbound message to client state, the media controller, and
/// the `ClientEvent` stream. Returns `true` only for `kicked`, signalling
/// the caller to stop without reconnecting.
async fn handle_server_message(
    client: &SessionClient,
    code: &RoomCode,
    message: ServerMessage,
    last_ping: &Arc<Mutex<Option<Instant>>>,
    is_initial: bool,
) -> bool {
    match message {
        ServerMessage::RoomState {
            users: _,
            playback_state,
            current_video,
            host_id,
            videos,
        } => {
            client.set_host_id(host_id);
            client.merge_catalogue(videos);
            client.set_playback_state(playback_state.clone(), current_video);
            if is_initial {
                client.emit(ClientEvent::RoomJoined {
                    room_code: code.clone(),
                    user_id: client.user_id(),
                    host_id,
                });
            }
            // Sync-on-join (§4.G): a non-absent `current_video` means the
            // room is already mid-session. This path bypasses the
            // ready-sync barrier entirely.
            if let Some(video_id) = current_video {
                spawn_sync_on_join(client.clone(), video_id, playback_state);
            }
        }
        ServerMessage::UserJoined { user_id, username, .. } => {
            client.emit(ClientEvent::UserJoined { user_id, username });
        }
        ServerMessage::UserLeft { user_id, username, .. } => {
            client.emit(ClientEvent::UserLeft { user_id, username });
        }
        ServerMessage::UserKicked { username, kicked_by, .. } => {
            client.emit(ClientEvent::UserKicked { username, kicked_by });
        }
        ServerMessage::Kicked { message } => {
            client.emit(ClientEvent::Kicked { message });
            return true;
        }
        ServerMessage::Play { position, .. } => {
            client.apply_remote(|media| {
                media.seek(position);
                media.play();
            });
        }
        ServerMessage::Pause { position, .. } => {
            client.apply_remote(|media| {
                media.seek(position);
                media.pause();
            });
        }
        ServerMessage::Seek { position, .. } => {
            client.apply_remote(|media| media.seek(position));
        }
        ServerMessage::Speed { speed, .. } => {
            client.apply_remote(|media| media.set_rate(speed));
        }
        ServerMessage::PrepareVideo { video_id, .. } => {
            spawn_ready_sync_download(client.clone(), video_id);
        }
        ServerMessage::ReadyProgress { video_id, ready, total } => {
            client.emit(ClientEvent::ReadyProgress { video_id, ready, total });
        }
        ServerMessage::AllReady { video_id } => {
            let speed = client.playback_state().speed;
            client.set_playback_state(
                PlaybackState {
                    playing: true,
                    position: 0.0,
                    speed,
                },
                Some(video_id),
            );
            if let Some(path) = client.local_path(video_id) {
                client.apply_remote(|media| {
                    media.load(&path);
                    media.seek(0.0);
                    media.play();
                });
            }
            client.emit(ClientEvent::AllReady { video_id });
        }
        ServerMessage::VideoUploaded {
            video_id,
            filename,
            size,
            uploaded_by: _,
        } => {
            client.merge_catalogue(std::collections::HashMap::from([(
                video_id,
                crate::protocol::VideoSummary {
                    filename: filename.clone(),
                    size,
                },
            )]));
            client.emit(ClientEvent::VideoUploaded {
                video_id,
                filename,
                size,
            });
        }
        ServerMessage::ProvideRandomClip { requested_by } => {
            spawn_shared_pool_response(client.clone(), requested_by);
        }
        ServerMessage::SharedPoolChanged { enabled, .. } => {
            client.emit(ClientEvent::SharedPoolChanged { enabled });
        }
        ServerMessage::Pong {} => {
            let sent_at = last_ping.lock().unwrap().take();
            if let Some(sent_at) = sent_at {
                let millis = sent_at.elapsed().as_secs_f64() * 1000.0;
                client.emit(ClientEvent::Latency { millis });
            }
        }
        ServerMessage::Error { message } => {
            client.emit(ClientEvent::RoomError { message });
        }
    }
    false
}

/// Background download that applies the room's authoritative playback
/// state once bytes are ready, without going through the ready-sync
/// barrier (§4.G "this path does NOT go through the ready-sync barrier").
fn spawn_sync_on_join(client: SessionClient, video_id: VideoId, playback_state: PlaybackState) {
    tokio::spawn(async move {
        match client.download_video(video_id).await {
            Ok(path) => {
                client.apply_remote(|media| {
                    media.load(&path);
                    media.seek(playback_state.position);
                    media.set_rate(playback_state.speed);
                    if playback_state.playing {
                        media.play();
                    } else {
                        media.pause();
                    }
                });
            }
            Err(err) => client.emit(ClientEvent::RoomError { message: err.message() }),
        }
    });
}

/// Background download triggered by `prepare_video`; once complete, loads
/// the clip locally (still paused) and signals readiness (§4.F, §4.G).
fn spawn_ready_sync_download(client: SessionClient, video_id: VideoId) {
    tokio::spawn(async move {
        match client.download_video(video_id).await {
            Ok(path) => {
                client.apply_remote(|media| media.load(&path));
                client.mark_ready(video_id);
            }
            Err(err) => client.emit(ClientEvent::RoomError { message: err.message() }),
        }
    });
}

/// Shared-pool handler (§4.G): obtain a random local clip, upload it, and
/// announce it — never plays it locally before the barrier commits.
fn spawn_shared_pool_response(client: SessionClient, _requested_by: ParticipantId) {
    tokio::spawn(async move {
        let Some(path) = client.library().random_clip() else {
            return;
        };
        match client.upload_file(&path).await {
            Ok(video_id) => client.play_video(video_id),
            Err(err) => client.emit(ClientEvent::RoomError { message: err.message() }),
        }
    });
}

/// Re-POSTs the join endpoint with remembered credentials and reopens the
/// channel on success (§4.G reconnection policy). Gives up immediately on
/// `NotFound` (the room is gone); otherwise retries across the full
/// backoff schedule before giving up.
async fn reconnect(client: &SessionClient, code: &RoomCode) -> Option<RoomCode> {
    let (password, username) = client.room_credentials();
    for &backoff_secs in RECONNECT_BACKOFF_SECONDS.iter() {
        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        match client.join_room_http(code, &password, &username).await {
            Ok(body) => {
                client.set_room_context(code.clone(), password, username, body.user_id);
                client.set_host_id(body.host_id);
                client.set_playback_state(body.playback_state, body.current_video);
                client.merge_catalogue(body.videos);
                return Some(code.clone());
            }
            Err(RdmError::NotFound) => return None,
            Err(_) => continue,
        }
    }
    None
}

fn websocket_url(base_url: &str, code: &RoomCode) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{ws_base}/rooms/{code}/ws")
}

async fn send_json<S>(sink: &mut S, message: &ClientMessage) -> Result<(), ()>
where
    S: futures::Sink<WsMessage> + Unpin,
{
    let text = serde_json::to_string(message).map_err(|_| ())?;
    sink.send(WsMessage::Text(text)).await.map_err(|_| ())
}
