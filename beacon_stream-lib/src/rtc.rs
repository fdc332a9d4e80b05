//! webrtc-rs backed peer connections.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::{Mutex, mpsc};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::config::IceServerConfig;
use crate::error::RelayError;
use crate::peer::{
    DATA_CHANNEL_LABEL, IceCandidate, PeerConnector, PeerLink, PeerObserver, SdpKind,
    SessionDescription,
};
use crate::registry::{ChannelId, OutboundChannel};

/// Builds one data-only peer connection per signaling session.
pub struct RtcConnector {
    api: API,
    config: RTCConfiguration,
}

impl RtcConnector {
    pub fn new(ice_servers: &[IceServerConfig]) -> Self {
        Self {
            api: APIBuilder::new().build(),
            config: RTCConfiguration {
                ice_servers: ice_servers.iter().map(rtc_ice_server).collect(),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(&self, observer: Arc<dyn PeerObserver>) -> Result<Arc<dyn PeerLink>, RelayError> {
        let pc = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);
        let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
        let channel = Arc::new(RtcChannel { id: ChannelId::next(), dc: Arc::clone(&dc) });

        // weak: the data channel owns this handler
        let opened = Arc::downgrade(&channel);
        let obs = Arc::clone(&observer);
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                if let Some(channel) = opened.upgrade() {
                    obs.channel_open(channel).await;
                }
            })
        }));

        let id = channel.id;
        let obs = Arc::clone(&observer);
        dc.on_close(Box::new(move || {
            let obs = Arc::clone(&obs);
            Box::pin(async move {
                obs.channel_closed(id).await;
            })
        }));

        let obs = observer;
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let obs = Arc::clone(&obs);
            Box::pin(async move {
                let candidate = match candidate.map(|c| c.to_json()).transpose() {
                    Ok(candidate) => candidate.map(ice_from_rtc),
                    Err(e) => {
                        error!("Failed to encode local ICE candidate: {}", e);
                        return;
                    }
                };
                obs.local_candidate(candidate).await;
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("Peer connection {} state: {}", id, state);
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcPeer { pc, channel, gathering: Mutex::new(None) }))
    }
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    // keeps the data channel handle alive for the open handler
    #[allow(dead_code)]
    channel: Arc<RtcChannel>,
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
}

#[async_trait]
impl PeerLink for RtcPeer {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RelayError> {
        self.pc.set_remote_description(description_to_rtc(desc)?).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, RelayError> {
        description_from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RelayError> {
        // subscribe before gathering can start
        let gather = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(description_to_rtc(desc)?).await?;
        *self.gathering.lock().await = Some(gather);
        Ok(())
    }

    async fn gathering_complete(&self) {
        let gather = self.gathering.lock().await.take();
        if let Some(mut gather) = gather {
            let _ = gather.recv().await;
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        match description_from_rtc(desc) {
            Ok(desc) => Some(desc),
            Err(e) => {
                error!("Unusable local description: {}", e);
                None
            }
        }
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), RelayError> {
        self.pc.add_ice_candidate(ice_to_rtc(candidate)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Outbound data channel registered with the fan-out.
pub struct RtcChannel {
    id: ChannelId,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl OutboundChannel for RtcChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, payload: &str) -> Result<(), RelayError> {
        self.dc.send_text(payload.to_owned()).await?;
        Ok(())
    }
}

/// Username only when set; credential and password credential type only when
/// a password is configured. TURN urls are refused without the latter.
fn rtc_ice_server(server: &IceServerConfig) -> RTCIceServer {
    let mut ice = RTCIceServer { urls: vec![server.url.clone()], ..Default::default() };
    if !server.username.is_empty() {
        ice.username = server.username.clone();
    }
    if !server.password.is_empty() {
        ice.credential = server.password.clone();
        ice.credential_type = RTCIceCredentialType::Password;
    }
    ice
}

fn description_to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, RelayError> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpKind::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = desc.sdp;
            rollback
        }
    };
    Ok(rtc)
}

fn description_from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, RelayError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(RelayError::Negotiation("session description has no type".into()));
        }
    };
    Ok(SessionDescription::new(kind, desc.sdp))
}

fn ice_to_rtc(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn ice_from_rtc(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct QuietObserver;

    #[async_trait]
    impl PeerObserver for QuietObserver {
        async fn local_candidate(&self, _candidate: Option<IceCandidate>) {}
        async fn channel_open(&self, _channel: Arc<dyn OutboundChannel>) {}
        async fn channel_closed(&self, _channel: ChannelId) {}
    }

    #[test]
    fn ice_servers_carry_credentials_only_when_set() {
        let stun = rtc_ice_server(&IceServerConfig::stun("stun:stun.example.org:3478"));
        assert_eq!(stun.urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert!(stun.username.is_empty());
        assert!(stun.credential.is_empty());
        assert_eq!(stun.credential_type, RTCIceCredentialType::Unspecified);

        let turn = rtc_ice_server(&IceServerConfig {
            url: "turn:turn.example.org".into(),
            username: "alice".into(),
            password: "secret".into(),
        });
        assert_eq!(turn.username, "alice");
        assert_eq!(turn.credential, "secret");
        assert_eq!(turn.credential_type, RTCIceCredentialType::Password);
    }

    #[tokio::test]
    async fn turn_server_with_password_builds_a_peer_connection() {
        let connector = RtcConnector::new(&[
            IceServerConfig::stun("stun:stun.l.google.com:19302"),
            IceServerConfig {
                url: "turn:turn.example.org:3478".into(),
                username: "user".into(),
                password: "pass".into(),
            },
        ]);
        let peer = connector.connect(Arc::new(QuietObserver)).await;
        assert!(peer.is_ok(), "peer connection refused: {:?}", peer.as_ref().err());
        peer.unwrap().close().await.unwrap();
    }

    #[test]
    fn candidates_map_field_for_field() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 192.0.2.1 5000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("frag".into()),
        };
        assert_eq!(ice_from_rtc(ice_to_rtc(candidate.clone())), candidate);
    }

    #[test]
    fn unspecified_description_is_rejected() {
        let err = description_from_rtc(RTCSessionDescription::default());
        assert!(matches!(err, Err(RelayError::Negotiation(_))));
    }

    #[test]
    fn rollback_needs_no_sdp_body() {
        let rtc = description_to_rtc(SessionDescription::new(SdpKind::Rollback, "")).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Rollback);
    }

    #[tokio::test]
    async fn malformed_remote_offer_is_an_error() {
        let connector = RtcConnector::new(&[]);
        let peer = connector.connect(Arc::new(QuietObserver)).await.unwrap();

        let result = peer
            .set_remote_description(SessionDescription::new(SdpKind::Offer, "not an sdp"))
            .await;
        assert!(result.is_err());
        assert!(peer.local_description().await.is_none());
        peer.close().await.unwrap();
    }
}
