//! Exercises the Session Client (§4.G) against a live server: create a
//! room, share a clip, and observe it come back through the ready-sync
//! barrier as a `ClientEvent::AllReady`.

mod fixture;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rdm_server::client::{ClientEvent, ClipLibrary, MediaController, SessionClient};

#[derive(Default)]
struct RecordingMedia {
    calls: Mutex<Vec<String>>,
}

impl MediaController for RecordingMedia {
    fn load(&self, path: &Path) {
        self.calls.lock().unwrap().push(format!("load:{}", path.display()));
    }
    fn play(&self) {
        self.calls.lock().unwrap().push("play".into());
    }
    fn pause(&self) {
        self.calls.lock().unwrap().push("pause".into());
    }
    fn seek(&self, fraction: f64) {
        self.calls.lock().unwrap().push(format!("seek:{fraction}"));
    }
    fn set_rate(&self, rate: f64) {
        self.calls.lock().unwrap().push(format!("rate:{rate}"));
    }
    fn position(&self) -> f64 {
        0.0
    }
    fn is_playing(&self) -> bool {
        self.calls.lock().unwrap().last().map(|c| c == "play").unwrap_or(false)
    }
    fn ended(&self) -> bool {
        false
    }
}

struct EmptyLibrary;
impl ClipLibrary for EmptyLibrary {
    fn random_clip(&self) -> Option<PathBuf> {
        None
    }
}

async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("event stream closed")
}

async fn next_matching<F: Fn(&ClientEvent) -> bool>(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<ClientEvent>,
    matches: F,
) -> ClientEvent {
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn sharing_a_clip_as_the_sole_participant_commits_immediately() {
    let server = fixture::spawn_server().await;
    let download_dir = tempfile::tempdir().unwrap();
    let media = std::sync::Arc::new(RecordingMedia::default());
    let (client, mut events) = SessionClient::new(
        server.base_url.clone(),
        media.clone(),
        std::sync::Arc::new(EmptyLibrary),
        download_dir.path().to_path_buf(),
    );

    client
        .create_room("sw0rdfish".to_string(), "Host".to_string())
        .await
        .unwrap();
    let _ = next_matching(&mut events, |e| matches!(e, ClientEvent::RoomJoined { .. })).await;
    assert!(client.is_host());

    let clip_dir = tempfile::tempdir().unwrap();
    let clip_path = clip_dir.path().join("clip.mp4");
    tokio::fs::write(&clip_path, b"pretend video bytes").await.unwrap();

    let video_id = client.share_video(&clip_path).await.unwrap();

    let _ = next_matching(&mut events, |e| matches!(e, ClientEvent::VideoUploaded { .. })).await;
    let all_ready = next_matching(&mut events, |e| matches!(e, ClientEvent::AllReady { .. })).await;
    assert!(matches!(all_ready, ClientEvent::AllReady { video_id: v } if v == video_id));

    // The solo host already has the bytes locally; AllReady should have
    // driven play() without a redundant download.
    let calls = media.calls.lock().unwrap().clone();
    assert!(calls.contains(&"play".to_string()), "calls were: {calls:?}");
}
