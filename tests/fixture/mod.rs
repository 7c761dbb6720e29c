//! Shared integration-test harness: spins up a real `rdm-server` instance
//! bound to an ephemeral port, backed by a throwaway upload directory.

use std::sync::Arc;

use rdm_server::config::Config;
use rdm_server::ids::RoomCode;
use rdm_server::registry::Registry;

pub struct TestServer {
    pub base_url: String,
    pub registry: Arc<Registry>,
    _upload_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn ws_url(&self, code: &RoomCode) -> String {
        format!(
            "ws://{}/rooms/{}/ws",
            self.base_url.trim_start_matches("http://"),
            code
        )
    }
}

/// Starts the full HTTP + signaling `warp::Filter` tree (the same one
/// `main.rs` serves) on `127.0.0.1:0` and returns once it is accepting
/// connections.
pub async fn spawn_server() -> TestServer {
    let upload_dir = tempfile::tempdir().unwrap();
    let config = Arc::new(Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        upload_dir: upload_dir.path().to_string_lossy().into_owned(),
        max_file_size_mb: 1,
        room_expiry_seconds: 14400,
    });
    let registry = Arc::new(Registry::new(config.upload_dir.clone()));

    let routes = signaling_routes(registry.clone()).or(rdm_server::http::routes(registry.clone(), config));

    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    TestServer {
        base_url: format!("http://{addr}"),
        registry,
        _upload_dir: upload_dir,
    }
}

fn signaling_routes(
    registry: Arc<Registry>,
) -> impl warp::Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone {
    use warp::Filter;
    warp::path!("rooms" / String / "ws")
        .and(warp::ws())
        .and(warp::any().map(move || registry.clone()))
        .map(|code: String, ws: warp::ws::Ws, registry: Arc<Registry>| {
            ws.on_upgrade(move |socket| {
                rdm_server::channel::handle_connection(socket, registry, RoomCode::from(code))
            })
        })
}
