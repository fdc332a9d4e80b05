//! The peer-connection capability the signaling session drives.
//!
//! Negotiation internals (ICE, DTLS, SDP semantics) stay behind these traits;
//! [`crate::rtc`] backs them with webrtc-rs, tests back them with fakes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::registry::{ChannelId, OutboundChannel};

/// Label of the single outbound data channel created per peer.
pub const DATA_CHANNEL_LABEL: &str = "data";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description in browser JSON form: `{"type":"offer","sdp":"v=0..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self { kind, sdp: sdp.into() }
    }
}

/// ICE candidate in browser `RTCIceCandidateInit` JSON form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// One negotiated (or negotiating) peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RelayError>;

    async fn create_answer(&self) -> Result<SessionDescription, RelayError>;

    /// Apply the local description; this starts local candidate gathering.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RelayError>;

    /// Resolves once local candidate gathering has finished.
    async fn gathering_complete(&self);

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), RelayError>;

    async fn close(&self) -> Result<(), RelayError>;
}

/// Receives the asynchronous events of one peer connection.
#[async_trait]
pub trait PeerObserver: Send + Sync {
    /// A local candidate was discovered; `None` marks the end of gathering.
    async fn local_candidate(&self, candidate: Option<IceCandidate>);

    async fn channel_open(&self, channel: Arc<dyn OutboundChannel>);

    async fn channel_closed(&self, channel: ChannelId);
}

/// Creates a peer connection plus its outbound data channel and wires its
/// events to `observer`.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, observer: Arc<dyn PeerObserver>) -> Result<Arc<dyn PeerLink>, RelayError>;
}
