//! The signaling channel: one per connected participant, carrying the
//! tagged JSON protocol in `protocol.rs` over a `warp` WebSocket (§4.D, §5).

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use warp::ws::{Message, WebSocket};

use crate::config::AUTH_HANDSHAKE_DEADLINE;
use crate::ids::{ParticipantId, RoomCode};
use crate::protocol::{ClientMessage, ServerMessage, VideoSummary};
use crate::registry::Registry;
use crate::room::{schedule_ready_sync_timeout, Room, RoomEffect};
use std::collections::HashMap;
use std::sync::Arc;

/// Drives one participant's signaling channel end to end: the initial
/// `auth` handshake, then a read-dispatch loop paired with a single write
/// task that serializes all outbound traffic onto the socket.
pub async fn handle_connection(ws: WebSocket, registry: Arc<Registry>, code: RoomCode) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let room = match registry.lookup(&code).await {
        Some(room) => room,
        None => {
            let _ = ws_tx
                .send(error_message("room no longer exists"))
                .await;
            return;
        }
    };

    let auth = match timeout(AUTH_HANDSHAKE_DEADLINE, read_auth(&mut ws_rx)).await {
        Ok(Some(auth)) => auth,
        Ok(None) | Err(_) => {
            let _ = ws_tx.send(error_message("auth handshake timed out")).await;
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let ping_tx = outbound_tx.clone();
    let snapshot = room.join(auth.user_id, auth.username.clone(), outbound_tx);
    let mut closed = room.subscribe_closed();

    let _ = outbound_rx_send_room_state(&mut ws_tx, &snapshot).await;

    let write_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if send_json(&mut ws_tx, &message).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            message = ws_rx.next() => {
                let Some(Ok(message)) = message else { break };
                if message.is_close() {
                    break;
                }
                let Ok(text) = message.to_str() else {
                    continue;
                };
                let Ok(client_message) = serde_json::from_str::<ClientMessage>(text) else {
                    continue;
                };
                if matches!(client_message, ClientMessage::Ping {}) {
                    let _ = ping_tx.send(ServerMessage::Pong {});
                    continue;
                }
                dispatch(&room, auth.user_id, client_message);
            }
            reason = closed.recv() => {
                let message = reason.unwrap_or_else(|_| "room closed".to_string());
                let _ = ping_tx.send(ServerMessage::Error { message });
                break;
            }
        }
    }

    room.leave(auth.user_id);
    // Let any already-queued outbound messages (including a close-reason
    // error frame) flush before the socket goes away, rather than
    // truncating the write task mid-send.
    drop(ping_tx);
    let _ = write_task.await;
}

struct AuthFrame {
    user_id: ParticipantId,
    username: String,
}

/// Reads exactly one frame off the socket and accepts it only if it's
/// `auth` (§4.E): the handshake does not tolerate skipping over other
/// first messages while waiting for one, it fails closed on the spot.
async fn read_auth(
    ws_rx: &mut (impl futures::Stream<Item = Result<Message, warp::Error>> + Unpin),
) -> Option<AuthFrame> {
    let message = ws_rx.next().await?.ok()?;
    let text = message.to_str().ok()?;
    match serde_json::from_str(text) {
        Ok(ClientMessage::Auth { user_id, username }) => Some(AuthFrame { user_id, username }),
        _ => None,
    }
}

async fn outbound_rx_send_room_state(
    ws_tx: &mut (impl futures::Sink<Message, Error = warp::Error> + Unpin),
    snapshot: &crate::room::RoomSnapshot,
) -> Result<(), ()> {
    let videos: HashMap<_, VideoSummary> = snapshot.videos.clone();
    let message = ServerMessage::RoomState {
        users: snapshot.users.clone(),
        playback_state: snapshot.playback_state.clone(),
        current_video: snapshot.current_video,
        host_id: snapshot.host_id,
        videos,
    };
    send_json(ws_tx, &message).await
}

async fn send_json(
    ws_tx: &mut (impl futures::Sink<Message, Error = warp::Error> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(message).map_err(|_| ())?;
    ws_tx.send(Message::text(text)).await.map_err(|_| ())
}

fn error_message(message: &str) -> Message {
    let payload = ServerMessage::Error {
        message: message.to_string(),
    };
    Message::text(serde_json::to_string(&payload).unwrap())
}

fn dispatch(room: &Room, from: ParticipantId, message: ClientMessage) {
    match message {
        ClientMessage::Auth { .. } => {}
        ClientMessage::Play { position } => room.apply_play(from, position),
        ClientMessage::Pause { position } => room.apply_pause(from, position),
        ClientMessage::Seek { position } => room.apply_seek(from, position),
        ClientMessage::Speed { speed } => room.apply_speed(from, speed),
        ClientMessage::PlayVideo { video_id } => {
            if let Some(RoomEffect::ScheduleReadySyncTimeout(video_id)) =
                room.share_video(video_id, from)
            {
                schedule_ready_sync_timeout(room, video_id);
            }
        }
        ClientMessage::Ready { video_id } => room.mark_ready(from, video_id),
        ClientMessage::Kick { target_user_id } => {
            if let Err(message) = room.kick(from, target_user_id) {
                room.send_to(from, ServerMessage::Error { message });
            }
        }
        ClientMessage::SetSharedPool { enabled } => {
            if let Err(message) = room.set_shared_pool(from, enabled) {
                room.send_to(from, ServerMessage::Error { message });
            }
        }
        ClientMessage::RequestRandom {} => room.request_random(from),
        ClientMessage::Ping {} => {}
    }
}
