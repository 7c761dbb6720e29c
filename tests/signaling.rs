//! Exercises the Signaling Channel and the ready-sync barrier end to end
//! over real websocket connections (§4.E, §4.F, §8).

mod fixture;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use rdm_server::ids::{ParticipantId, RoomCode};
use rdm_server::protocol::ServerMessage;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_and_auth(url: &str, user_id: ParticipantId, username: &str) -> Socket {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let auth = json!({"type": "auth", "user_id": user_id, "username": username});
    ws.send(Message::Text(auth.to_string())).await.unwrap();
    ws
}

async fn next_message(ws: &mut Socket) -> ServerMessage {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a server message")
        .expect("channel closed")
        .unwrap();
    let Message::Text(text) = msg else {
        panic!("expected a text frame, got {msg:?}")
    };
    serde_json::from_str(&text).unwrap()
}

async fn next_matching<F: Fn(&ServerMessage) -> bool>(ws: &mut Socket, matches: F) -> ServerMessage {
    loop {
        let message = next_message(ws).await;
        if matches(&message) {
            return message;
        }
    }
}

async fn create_room(client: &reqwest::Client, base_url: &str, password: &str, username: &str) -> (RoomCode, ParticipantId) {
    let body: serde_json::Value = client
        .post(format!("{base_url}/rooms"))
        .json(&json!({"password": password, "username": username}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    (
        RoomCode::from(body["room_code"].as_str().unwrap()),
        body["host_id"].as_str().unwrap().parse().unwrap(),
    )
}

async fn join_room(client: &reqwest::Client, base_url: &str, code: &RoomCode, password: &str, username: &str) -> ParticipantId {
    let body: serde_json::Value = client
        .post(format!("{base_url}/rooms/{code}/join"))
        .json(&json!({"password": password, "username": username}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["user_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn auth_then_room_state_is_the_first_frame() {
    let server = fixture::spawn_server().await;
    let client = reqwest::Client::new();
    let (code, host_id) = create_room(&client, &server.base_url, "pw123", "Host").await;

    let mut ws = connect_and_auth(&server.ws_url(&code), host_id, "Host").await;
    let first = next_message(&mut ws).await;
    assert!(matches!(first, ServerMessage::RoomState { host_id: hid, .. } if hid == host_id));
}

#[tokio::test]
async fn playback_events_do_not_echo_back_to_the_sender() {
    let server = fixture::spawn_server().await;
    let client = reqwest::Client::new();
    let (code, host_id) = create_room(&client, &server.base_url, "pw123", "Host").await;
    let guest_id = join_room(&client, &server.base_url, &code, "pw123", "Guest").await;

    let mut host_ws = connect_and_auth(&server.ws_url(&code), host_id, "Host").await;
    let mut guest_ws = connect_and_auth(&server.ws_url(&code), guest_id, "Guest").await;
    let _ = next_message(&mut host_ws).await; // room_state
    let _ = next_message(&mut guest_ws).await; // room_state
    let _ = next_matching(&mut host_ws, |m| matches!(m, ServerMessage::UserJoined { .. })).await;

    host_ws
        .send(Message::Text(json!({"type": "play", "position": 12.5}).to_string()))
        .await
        .unwrap();

    let received = next_matching(&mut guest_ws, |m| matches!(m, ServerMessage::Play { .. })).await;
    assert!(matches!(received, ServerMessage::Play { position, user, .. } if position == 12.5 && user == host_id));

    // The sender never sees its own event echoed back.
    let timed_out = tokio::time::timeout(Duration::from_millis(300), next_message(&mut host_ws)).await;
    assert!(timed_out.is_err(), "host should not receive its own play event back");
}

#[tokio::test]
async fn ready_sync_barrier_commits_once_every_participant_is_ready() {
    let server = fixture::spawn_server().await;
    let client = reqwest::Client::new();
    let (code, host_id) = create_room(&client, &server.base_url, "pw123", "Host").await;
    let guest_id = join_room(&client, &server.base_url, &code, "pw123", "Guest").await;

    // Membership (and thus `is_member`) is only established by the
    // signaling auth handshake (§3), so both channels need to be open
    // before the host's upload, not just before the `play_video`.
    let mut host_ws = connect_and_auth(&server.ws_url(&code), host_id, "Host").await;
    let mut guest_ws = connect_and_auth(&server.ws_url(&code), guest_id, "Guest").await;
    let _ = next_message(&mut host_ws).await;
    let _ = next_message(&mut guest_ws).await;
    let _ = next_matching(&mut host_ws, |m| matches!(m, ServerMessage::UserJoined { .. })).await;

    let form = reqwest::multipart::Form::new()
        .text("user_id", host_id.to_string())
        .part("file", reqwest::multipart::Part::bytes(b"clip bytes".to_vec()).file_name("clip.mp4"));
    let uploaded: serde_json::Value = client
        .post(format!("{}/rooms/{code}/upload", server.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let video_id: rdm_server::ids::VideoId = uploaded["video_id"].as_str().unwrap().parse().unwrap();

    let _ = next_matching(&mut host_ws, |m| matches!(m, ServerMessage::VideoUploaded { .. })).await;
    let _ = next_matching(&mut guest_ws, |m| matches!(m, ServerMessage::VideoUploaded { .. })).await;

    host_ws
        .send(Message::Text(json!({"type": "play_video", "video_id": video_id}).to_string()))
        .await
        .unwrap();

    let prepare = next_matching(&mut guest_ws, |m| matches!(m, ServerMessage::PrepareVideo { .. })).await;
    assert!(matches!(prepare, ServerMessage::PrepareVideo { video_id: v, .. } if v == video_id));

    // Commit hasn't happened: only the host (implicitly ready as initiator)
    // is in the ready set so far.
    let not_ready_yet = tokio::time::timeout(Duration::from_millis(200), next_matching(&mut host_ws, |m| matches!(m, ServerMessage::AllReady { .. }))).await;
    assert!(not_ready_yet.is_err());

    guest_ws
        .send(Message::Text(json!({"type": "ready", "video_id": video_id}).to_string()))
        .await
        .unwrap();

    let all_ready = next_matching(&mut host_ws, |m| matches!(m, ServerMessage::AllReady { .. })).await;
    assert!(matches!(all_ready, ServerMessage::AllReady { video_id: v } if v == video_id));
}

#[tokio::test]
async fn host_can_kick_a_participant_but_a_guest_cannot() {
    let server = fixture::spawn_server().await;
    let client = reqwest::Client::new();
    let (code, host_id) = create_room(&client, &server.base_url, "pw123", "Host").await;
    let guest_id = join_room(&client, &server.base_url, &code, "pw123", "Guest").await;

    let mut host_ws = connect_and_auth(&server.ws_url(&code), host_id, "Host").await;
    let mut guest_ws = connect_and_auth(&server.ws_url(&code), guest_id, "Guest").await;
    let _ = next_message(&mut host_ws).await;
    let _ = next_message(&mut guest_ws).await;
    let _ = next_matching(&mut host_ws, |m| matches!(m, ServerMessage::UserJoined { .. })).await;

    // A guest attempting to kick the host has no visible effect on the
    // host: it stays a member, and no `kicked` frame is sent. The guest
    // instead receives an explicit `error` reply (§4.B, S5).
    guest_ws
        .send(Message::Text(json!({"type": "kick", "target_user_id": host_id}).to_string()))
        .await
        .unwrap();
    let nothing_happened = tokio::time::timeout(Duration::from_millis(200), next_message(&mut host_ws)).await;
    assert!(nothing_happened.is_err());

    let error = next_matching(&mut guest_ws, |m| matches!(m, ServerMessage::Error { .. })).await;
    assert!(
        matches!(error, ServerMessage::Error { message } if message == "Only the host can kick users")
    );

    // The host can kick the guest: the guest receives `kicked` and is
    // dropped from the room.
    host_ws
        .send(Message::Text(json!({"type": "kick", "target_user_id": guest_id}).to_string()))
        .await
        .unwrap();
    let kicked = next_matching(&mut guest_ws, |m| matches!(m, ServerMessage::Kicked { .. })).await;
    assert!(matches!(kicked, ServerMessage::Kicked { .. }));
}

#[tokio::test]
async fn expiry_sweep_disconnects_a_still_connected_channel() {
    let server = fixture::spawn_server().await;
    let client = reqwest::Client::new();
    let (code, host_id) = create_room(&client, &server.base_url, "pw123", "Host").await;

    let mut host_ws = connect_and_auth(&server.ws_url(&code), host_id, "Host").await;
    let _ = next_message(&mut host_ws).await; // room_state

    // A zero-duration expiry makes every room immediately reapable,
    // including this one even though its channel is still open (§4.A
    // `sweep` is not gated on emptiness).
    server.registry.sweep(Duration::from_secs(0)).await;

    let error = next_matching(&mut host_ws, |m| matches!(m, ServerMessage::Error { .. })).await;
    assert!(matches!(error, ServerMessage::Error { message } if message == "expired"));

    assert!(server.registry.lookup(&code).await.is_none());
}
