// src/main.rs

mod ice;
mod signal_ws;

use std::{error::Error, sync::Arc};

use beacon_stream_lib::{
    ActiveRecord,   // deployment-wide telemetry shape
    Context,        // registry + one-shot ingestor trigger
    PeerConnector,
    RelayConfig,
    RtcConnector,
};
use dotenv::dotenv;
use log::{error, info, warn};
use warp::Filter;

/* RUST_LOG=beacon_stream_lib=debug,beacon_stream_server=info \
cargo run -p beacon_stream-server */

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    // ──────── ① Load .env (variables may also come from the environment) ────────
    let dotenv_result = dotenv();

    // initialize logger and panic hook
    env_logger::init();
    std::panic::set_hook(Box::new(|info| {
        error!("Thread panic: {:?}", info);
    }));
    if let Err(e) = dotenv_result {
        warn!("No .env file loaded: {}", e);
    }

    // ──────── ② Require FEED_PROTOCOL & FEED_PORT ────────
    let config = RelayConfig::from_env().map_err(|e| format!("Invalid configuration: {}", e))?;
    info!(
        "Configured upstream feed: {} {}",
        config.feed.transport,
        config.feed.endpoint()
    );

    // shared relay state; the ingestor starts on the first open data channel
    let ctx = Context::for_feed::<ActiveRecord>(config.feed.clone());
    let connector: Arc<dyn PeerConnector> = Arc::new(RtcConnector::new(&config.ice_servers));

    // ──────── ③ HTTP (health + ICE config) and signaling WebSocket ────────
    let health = warp::path!("health").map(|| "OK");
    let ice = ice::ice_route(config.ice_servers.clone());
    let signaling = signal_ws::ws_routes(ctx, connector);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "OPTIONS"])
        .allow_headers(vec!["content-type", "origin", "sec-websocket-protocol", "upgrade"]);
    let routes = health
        .or(ice)
        .or(signaling)
        .with(cors)
        .with(warp::log("beacon_stream_server::http"));

    info!("HTTP  : 0.0.0.0:{} (/health, /ice)", config.http_port);
    info!("WS    : 0.0.0.0:{}/beacon", config.http_port);

    warp::serve(routes).run(([0, 0, 0, 0], config.http_port)).await;
    Ok(())
}
