use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::context::Context;
use crate::error::RelayError;
use crate::peer::{IceCandidate, PeerConnector, PeerLink, PeerObserver, SdpKind, SessionDescription};
use crate::registry::{ChannelId, OutboundChannel};
use crate::signal::{SignalMessage, SignalWriter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Remote candidates held while no remote description is set.
pub const MAX_EARLY_CANDIDATES: usize = 64;

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Before the connector has produced a peer connection. [`Session::connect`]
    /// either moves past it or returns an error, so a live session never
    /// reports it.
    New,
    /// Peer connection and outbound data channel exist.
    Connected,
    /// Waiting for a usable remote description.
    Negotiating,
    /// Remote offer applied, local answer in progress.
    Answering,
    /// Local and remote descriptions both applied.
    Stable,
    Closed,
}

/// One client's signaling connection and the peer connection it negotiates.
///
/// Inbound messages are processed strictly one at a time by [`run`](Self::run);
/// peer events (local candidates, channel open/close) arrive concurrently
/// through the session's [`PeerObserver`].
pub struct Session {
    id: SessionId,
    state: SessionState,
    peer: Arc<dyn PeerLink>,
    observer: Arc<SessionObserver>,
    writer: Arc<SignalWriter>,
    remote_applied: bool,
    early_candidates: Vec<IceCandidate>,
}

impl Session {
    /// Create the peer connection and data channel for a new client.
    pub async fn connect(
        connector: &dyn PeerConnector,
        context: Context,
        writer: Arc<SignalWriter>,
    ) -> Result<Self, RelayError> {
        let id = SessionId::next();
        let observer = Arc::new(SessionObserver::new(id, context, Arc::clone(&writer)));
        let peer = connector.connect(observer.clone()).await?;
        info!("[{}] Peer connection and data channel created", id);
        debug!("[{}] {:?} -> {:?}", id, SessionState::New, SessionState::Connected);

        Ok(Self {
            id,
            state: SessionState::Connected,
            peer,
            observer,
            writer,
            remote_applied: false,
            early_candidates: Vec::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Process inbound frames in order until the connection fails or ends,
    /// then tear the session down.
    pub async fn run<S>(&mut self, mut inbound: S)
    where
        S: Stream<Item = Result<Vec<u8>, RelayError>> + Unpin,
    {
        self.begin_negotiation();
        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(bytes) => self.handle_frame(&bytes).await,
                Err(RelayError::SignalClosed) => {
                    info!("[{}] Signaling connection closed by client", self.id);
                    break;
                }
                Err(e) => {
                    error!("[{}] Signaling read error: {}", self.id, e);
                    break;
                }
            }
        }
        self.close().await;
    }

    /// Decode and apply one raw signaling frame. Undecodable frames are dropped.
    pub async fn handle_frame(&mut self, frame: &[u8]) {
        match serde_json::from_slice::<SignalMessage>(frame) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => warn!("[{}] Failed to decode signaling message: {}", self.id, e),
        }
    }

    /// Apply one signaling message: SDP first, then the candidate. A failure
    /// drops the rest of the message but never ends the session.
    pub async fn handle(&mut self, msg: SignalMessage) {
        self.begin_negotiation();
        if msg.is_empty() {
            debug!("[{}] Ignoring empty signaling message", self.id);
            return;
        }

        if let Some(sdp) = msg.sdp_payload() {
            if let Err(e) = self.apply_remote_description(sdp).await {
                error!("[{}] Dropping SDP message: {}", self.id, e);
                return;
            }
        }

        if let Some(candidate) = msg.candidate_payload() {
            if let Err(e) = self.apply_remote_candidate(candidate).await {
                error!("[{}] Dropping ICE candidate: {}", self.id, e);
            }
        }
    }

    fn begin_negotiation(&mut self) {
        if self.state == SessionState::Connected {
            self.state = SessionState::Negotiating;
        }
    }

    async fn apply_remote_description(&mut self, raw: &str) -> Result<(), RelayError> {
        let desc: SessionDescription = serde_json::from_str(raw)?;
        let kind = desc.kind;
        self.peer.set_remote_description(desc).await?;
        self.remote_applied = true;
        debug!("[{}] Remote {:?} applied", self.id, kind);
        self.flush_early_candidates().await;

        match kind {
            SdpKind::Offer => {
                self.state = SessionState::Answering;
                if let Err(e) = self.answer().await {
                    self.state = SessionState::Negotiating;
                    return Err(e);
                }
                self.state = SessionState::Stable;
            }
            SdpKind::Answer => self.state = SessionState::Stable,
            SdpKind::Pranswer | SdpKind::Rollback => self.state = SessionState::Negotiating,
        }
        Ok(())
    }

    /// Produce the local answer, wait for gathering, and send it back.
    async fn answer(&mut self) -> Result<(), RelayError> {
        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer).await?;
        self.peer.gathering_complete().await;

        let local = self
            .peer
            .local_description()
            .await
            .ok_or_else(|| RelayError::Negotiation("no local description after gathering".into()))?;
        let sdp = serde_json::to_string(&local)?;
        match self.writer.send(&SignalMessage::with_sdp(sdp)).await {
            Ok(()) => info!("[{}] Answer sent", self.id),
            Err(e) => error!("[{}] Failed to send answer: {}", self.id, e),
        }
        Ok(())
    }

    async fn apply_remote_candidate(&mut self, raw: &str) -> Result<(), RelayError> {
        let candidate: IceCandidate = serde_json::from_str(raw)?;
        if !self.remote_applied {
            if self.early_candidates.len() >= MAX_EARLY_CANDIDATES {
                warn!(
                    "[{}] {} ICE candidates already held without a remote description; dropping",
                    self.id, MAX_EARLY_CANDIDATES
                );
                return Ok(());
            }
            debug!("[{}] Holding ICE candidate until remote description is set", self.id);
            self.early_candidates.push(candidate);
            return Ok(());
        }
        self.peer.add_remote_candidate(candidate).await
    }

    async fn flush_early_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.early_candidates) {
            if let Err(e) = self.peer.add_remote_candidate(candidate).await {
                error!("[{}] Dropping held ICE candidate: {}", self.id, e);
            }
        }
    }

    async fn close(&mut self) {
        self.state = SessionState::Closed;
        if let Err(e) = self.peer.close().await {
            warn!("[{}] Error closing peer connection: {}", self.id, e);
        }
        self.observer.release().await;
        info!("[{}] Session closed", self.id);
    }
}

/// Peer-event half of a session: relays local candidates to the client and
/// keeps the registry in step with the data channel.
struct SessionObserver {
    id: SessionId,
    context: Context,
    writer: Arc<SignalWriter>,
    // held across registry updates so a late open cannot race a release
    channel: Mutex<ChannelSlot>,
}

#[derive(Default)]
struct ChannelSlot {
    current: Option<ChannelId>,
    released: bool,
}

impl SessionObserver {
    fn new(id: SessionId, context: Context, writer: Arc<SignalWriter>) -> Self {
        Self { id, context, writer, channel: Mutex::new(ChannelSlot::default()) }
    }

    /// Drop this session's channel from the registry, if it is still there.
    /// Channels opening after this are ignored.
    async fn release(&self) {
        let mut slot = self.channel.lock().await;
        slot.released = true;
        if let Some(channel) = slot.current.take() {
            self.context.channel_closed(channel).await;
        }
    }
}

#[async_trait]
impl PeerObserver for SessionObserver {
    async fn local_candidate(&self, candidate: Option<IceCandidate>) {
        let Some(candidate) = candidate else {
            debug!("[{}] Local candidate gathering finished", self.id);
            return;
        };
        let json = match serde_json::to_string(&candidate) {
            Ok(json) => json,
            Err(e) => {
                error!("[{}] Failed to encode ICE candidate: {}", self.id, e);
                return;
            }
        };
        if let Err(e) = self.writer.send(&SignalMessage::with_candidate(json)).await {
            error!("[{}] Failed to send ICE candidate: {}", self.id, e);
        }
    }

    async fn channel_open(&self, channel: Arc<dyn OutboundChannel>) {
        let mut slot = self.channel.lock().await;
        if slot.released {
            warn!("[{}] DataChannel {} opened after session close; ignored", self.id, channel.id());
            return;
        }
        info!("[{}] DataChannel {} opened", self.id, channel.id());
        slot.current = Some(channel.id());
        self.context.channel_opened(channel).await;
    }

    async fn channel_closed(&self, channel: ChannelId) {
        info!("[{}] DataChannel {} closed", self.id, channel);
        let mut slot = self.channel.lock().await;
        if slot.current == Some(channel) {
            slot.current = None;
        }
        self.context.channel_closed(channel).await;
    }
}
