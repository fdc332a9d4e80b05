use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::ready;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{error, info};
use warp::ws::{Message as WsMsg, WebSocket};
use warp::{Filter, Rejection, Reply};

use beacon_stream_lib::{Context, PeerConnector, RelayError, Session, SignalSink, SignalWriter};

/// Cloneable filter for the shared relay context
fn with_ctx(ctx: Context) -> impl Filter<Extract = (Context,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn with_connector(
    connector: Arc<dyn PeerConnector>,
) -> impl Filter<Extract = (Arc<dyn PeerConnector>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&connector))
}

/// Build the signaling WebSocket route under `/beacon`
pub fn ws_routes(
    ctx: Context,
    connector: Arc<dyn PeerConnector>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("beacon")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_ctx(ctx))
        .and(with_connector(connector))
        .map(|ws: warp::ws::Ws, ctx, connector| {
            ws.on_upgrade(move |socket| handle_ws(socket, ctx, connector))
        })
}

/// Write half of the client's WebSocket; every signaling message goes out as text
struct WsSink(SplitSink<WebSocket, WsMsg>);

#[async_trait]
impl SignalSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        self.0
            .send(WsMsg::text(text))
            .await
            .map_err(|e| RelayError::Signal(e.to_string()))
    }
}

async fn handle_ws(ws: WebSocket, ctx: Context, connector: Arc<dyn PeerConnector>) {
    let (ws_tx, ws_rx) = ws.split();
    let writer = Arc::new(SignalWriter::new(WsSink(ws_tx)));

    let mut session = match Session::connect(connector.as_ref(), ctx, writer).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create peer connection: {}", e);
            return;
        }
    };
    info!("[{}] Signaling client connected", session.id());

    // Incoming from client → session, in arrival order
    let inbound = ws_rx.filter_map(|frame| ready(inbound_frame(frame)));
    session.run(Box::pin(inbound)).await;
    info!("[{}] WebSocket client disconnected", session.id());
}

/// Text and binary frames carry JSON; ping/pong are skipped; close ends the session.
fn inbound_frame(frame: Result<WsMsg, warp::Error>) -> Option<Result<Vec<u8>, RelayError>> {
    match frame {
        Ok(msg) if msg.is_close() => Some(Err(RelayError::SignalClosed)),
        Ok(msg) if msg.is_text() || msg.is_binary() => Some(Ok(msg.into_bytes())),
        Ok(_) => None,
        Err(e) => Some(Err(RelayError::Signal(e.to_string()))),
    }
}
