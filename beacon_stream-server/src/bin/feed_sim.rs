//! Synthetic upstream feed for exercising the relay locally.
//!
//! Reads the same FEED_PROTOCOL / FEED_ADDRESS / FEED_PORT the relay does and
//! plays the other end: a WebSocket or TCP server for `ws` / `tcp`, a
//! datagram sender aimed at the relay's listener for `udp`.
//!
//! FEED_PROTOCOL=tcp FEED_PORT=13370 RUST_LOG=info cargo run -p beacon_stream-server --bin feed-sim

use std::{env, error::Error, net::SocketAddr, time::Duration};

use beacon_stream_lib::{ActiveRecord, FeedConfig, RelayConfig, Transport, telemetry};
use dotenv::dotenv;
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError};
use warp::Filter;
use warp::ws::{Message as WsMsg, WebSocket};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenv();
    env_logger::init();

    let feed = RelayConfig::from_env()
        .map_err(|e| format!("Invalid configuration: {}", e))?
        .feed;
    let interval = match env::var("SIM_INTERVAL_MS") {
        Ok(ms) => Duration::from_millis(
            ms.parse().map_err(|_| format!("SIM_INTERVAL_MS is not a number: '{}'", ms))?,
        ),
        Err(_) => DEFAULT_INTERVAL,
    };

    // one generator, fanned out to every connected consumer
    let (tx, _rx) = broadcast::channel::<String>(64);
    tokio::spawn(generate(tx.clone(), interval));

    info!("Simulating {} feed on {} every {:?}", feed.transport, feed.endpoint(), interval);
    match feed.transport {
        Transport::Tcp => serve_tcp(&feed, tx).await,
        Transport::WebSocket => serve_ws(&feed, tx).await,
        Transport::Udp => send_udp(&feed, tx.subscribe()).await,
    }
}

async fn generate(tx: Sender<String>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut tick = 0u64;
    loop {
        ticker.tick().await;
        match telemetry::encode(&synthetic(tick)) {
            Ok(json) => {
                // no subscribers yet is fine
                let _ = tx.send(json);
            }
            Err(e) => error!("Failed to encode synthetic record: {}", e),
        }
        tick += 1;
    }
}

/// Marker slowly sweeping left/right while drifting in range.
fn synthetic(tick: u64) -> ActiveRecord {
    let phase = tick as f64 * 0.1;
    // `+ 0.0` folds -0 into 0
    let round3 = |v: f64| (v * 1000.0).round() / 1000.0 + 0.0;
    ActiveRecord {
        marker_id: 500,
        angle_x: round3(phase.sin() * 0.2),
        angle_y: round3(phase.cos() * 0.05),
        distance: round3(1.5 + 0.5 * (phase * 0.5).sin()),
    }
}

async fn next_record(rx: &mut Receiver<String>) -> Option<String> {
    loop {
        match rx.recv().await {
            Ok(json) => return Some(json),
            Err(RecvError::Lagged(skipped)) => warn!("Consumer lagged, dropped {} records", skipped),
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn serve_tcp(feed: &FeedConfig, tx: Sender<String>) -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind(feed.endpoint()).await?;
    loop {
        let (mut stream, peer) = listener.accept().await?;
        info!("TCP consumer connected: {}", peer);
        let mut rx = tx.subscribe();
        tokio::spawn(async move {
            while let Some(json) = next_record(&mut rx).await {
                if let Err(e) = stream.write_all(format!("{json}\n").as_bytes()).await {
                    info!("TCP consumer {} gone: {}", peer, e);
                    break;
                }
            }
        });
    }
}

async fn serve_ws(feed: &FeedConfig, tx: Sender<String>) -> Result<(), Box<dyn Error>> {
    let addr: SocketAddr = format!("{}:{}", feed.address, feed.port)
        .parse()
        .map_err(|e| format!("WebSocket feed needs an IP address: {}", e))?;
    let route = warp::path::end().and(warp::ws()).map(move |ws: warp::ws::Ws| {
        let rx = tx.subscribe();
        ws.on_upgrade(move |socket| stream_ws(socket, rx))
    });
    warp::serve(route).run(addr).await;
    Ok(())
}

async fn stream_ws(socket: WebSocket, mut rx: Receiver<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    info!("WebSocket consumer connected");

    // drain the read side so close frames are noticed
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = ws_rx.next().await {} });
    while let Some(json) = next_record(&mut rx).await {
        if ws_tx.send(WsMsg::text(json)).await.is_err() {
            break;
        }
    }
    reader.abort();
    info!("WebSocket consumer disconnected");
}

async fn send_udp(feed: &FeedConfig, mut rx: Receiver<String>) -> Result<(), Box<dyn Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let target = feed.endpoint();
    while let Some(json) = next_record(&mut rx).await {
        if let Err(e) = socket.send_to(json.as_bytes(), target.as_str()).await {
            warn!("UDP send to {} failed: {}", target, e);
        }
    }
    Ok(())
}
