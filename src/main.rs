use std::sync::Arc;

use clap::Parser;
use warp::Filter;

use rdm_server::channel::handle_connection;
use rdm_server::config::{Config, SWEEP_INTERVAL};
use rdm_server::http;
use rdm_server::ids::RoomCode;
use rdm_server::registry::{spawn_sweeper, Registry};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::parse();
    log::info!(
        "starting rdm-server on {}:{} (upload_dir={}, max_file_size_mb={}, room_expiry_seconds={})",
        config.host,
        config.port,
        config.upload_dir,
        config.max_file_size_mb,
        config.room_expiry_seconds,
    );

    let registry = Arc::new(Registry::new(config.upload_dir.clone()));
    let config = Arc::new(config);

    spawn_sweeper(registry.clone(), SWEEP_INTERVAL, config.room_expiry());

    let signaling = warp::path!("rooms" / String / "ws")
        .and(warp::ws())
        .and(with_registry(registry.clone()))
        .map(|code: String, ws: warp::ws::Ws, registry: Arc<Registry>| {
            ws.on_upgrade(move |socket| handle_connection(socket, registry, RoomCode::from(code)))
        });

    let routes = signaling.or(http::routes(registry, config.clone())).with(warp::log("rdm-server"));

    let host: std::net::IpAddr = config.host.parse().expect("invalid RDM_HOST");
    warp::serve(routes).run((host, config.port)).await;
}

fn with_registry(
    registry: Arc<Registry>,
) -> impl Filter<Extract = (Arc<Registry>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}
