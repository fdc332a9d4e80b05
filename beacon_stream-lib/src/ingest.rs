use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMsg;

use crate::config::{FeedConfig, Transport};
use crate::error::RelayError;
use crate::registry::ChannelRegistry;
use crate::telemetry::{self, Record};

/// Fixed pause after a failed connect (WS/TCP) or a failed datagram read (UDP).
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Pulls records of type `R` from one upstream feed and fans each one out
/// through the registry.
pub struct Ingestor<R> {
    feed: FeedConfig,
    registry: Arc<ChannelRegistry>,
    retry_delay: Duration,
    state: watch::Sender<FeedState>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Ingestor<R> {
    pub fn new(feed: FeedConfig, registry: Arc<ChannelRegistry>) -> Self {
        let (state, _rx) = watch::channel(FeedState::Disconnected);
        Self {
            feed,
            registry,
            retry_delay: RETRY_DELAY,
            state,
            _record: PhantomData,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Run until the process exits. Only a UDP bind failure returns.
    pub async fn run(self) -> Result<(), RelayError> {
        match self.feed.transport {
            Transport::WebSocket => self.run_websocket().await,
            Transport::Tcp => self.run_tcp().await,
            Transport::Udp => self.run_udp().await,
        }
    }

    async fn run_websocket(&self) -> Result<(), RelayError> {
        let url = self.feed.endpoint();
        loop {
            self.set_state(FeedState::Connecting);
            info!("Connecting to upstream WebSocket at {}", url);
            let mut ws = match connect_async(url.as_str()).await {
                Ok((ws, _response)) => ws,
                Err(e) => {
                    error!("Failed to connect to upstream WebSocket {}: {}", url, e);
                    self.back_off().await;
                    continue;
                }
            };
            info!("Connected to upstream WebSocket at {}", url);
            self.set_state(FeedState::Streaming);

            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(WsMsg::Text(text)) => self.forward(text.as_bytes()).await,
                    Ok(WsMsg::Binary(bytes)) => self.forward(&bytes).await,
                    Ok(WsMsg::Close(_)) => {
                        info!("Upstream WebSocket {} sent close", url);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error reading from upstream WebSocket: {}", e);
                        break;
                    }
                }
            }
            let _ = ws.close(None).await;
            self.set_state(FeedState::Disconnected);
        }
    }

    async fn run_tcp(&self) -> Result<(), RelayError> {
        let addr = self.feed.endpoint();
        loop {
            self.set_state(FeedState::Connecting);
            info!("Connecting to TCP feed at {}", addr);
            let stream = match TcpStream::connect(addr.as_str()).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to connect to TCP feed {}: {}", addr, e);
                    self.back_off().await;
                    continue;
                }
            };
            info!("Connected to TCP feed at {}", addr);
            self.set_state(FeedState::Streaming);

            let mut reader = BufReader::new(stream);
            let mut line = Vec::with_capacity(256);
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => {
                        info!("TCP feed {} closed the connection", addr);
                        break;
                    }
                    Ok(_) if line.iter().all(u8::is_ascii_whitespace) => {}
                    Ok(_) => self.forward(&line).await,
                    Err(e) => {
                        error!("Error reading from TCP feed: {}", e);
                        break;
                    }
                }
            }
            self.set_state(FeedState::Disconnected);
        }
    }

    async fn run_udp(&self) -> Result<(), RelayError> {
        let addr = self.feed.endpoint();
        self.set_state(FeedState::Connecting);
        let socket = match UdpSocket::bind(addr.as_str()).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to listen on UDP address {}: {}", addr, e);
                self.set_state(FeedState::Disconnected);
                return Err(e.into());
            }
        };
        info!("Listening for UDP feed on {}", addr);
        self.set_state(FeedState::Streaming);
        self.read_datagrams(&socket).await
    }

    async fn read_datagrams<S: DatagramSource>(&self, source: &S) -> Result<(), RelayError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match source.next_datagram(&mut buf).await {
                Ok(n) => self.forward(&buf[..n]).await,
                Err(e) => {
                    error!("Error reading from UDP feed: {}", e);
                    sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Decode one unit and broadcast it. Bad units are dropped.
    async fn forward(&self, unit: &[u8]) {
        let record: R = match telemetry::decode(unit) {
            Ok(record) => record,
            Err(e) => {
                warn!("Dropping undecodable telemetry unit: {}", e);
                return;
            }
        };
        if let Err(e) = self.registry.broadcast(&record).await {
            error!("Failed to broadcast telemetry: {}", e);
        }
    }

    async fn back_off(&self) {
        self.set_state(FeedState::Disconnected);
        sleep(self.retry_delay).await;
    }

    fn set_state(&self, state: FeedState) {
        self.state.send_replace(state);
    }
}

#[async_trait]
trait DatagramSource: Sync {
    async fn next_datagram(&self, buf: &mut [u8]) -> std::io::Result<usize>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn next_datagram(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let (n, _from) = self.recv_from(buf).await?;
        Ok(n)
    }
}
