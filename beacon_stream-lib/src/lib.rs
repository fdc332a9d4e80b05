//! beacon_stream-lib: WebRTC signaling, data-channel fan-out and upstream
//! telemetry ingestion

pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod peer;
pub mod registry;
pub mod rtc;
pub mod session;
pub mod signal;
pub mod telemetry;
pub mod trigger;

// re-exports for ergonomic imports:
pub use config::{FeedConfig, IceServerConfig, RelayConfig, Transport};
pub use context::Context;
pub use error::RelayError;
pub use ingest::{FeedState, Ingestor, RETRY_DELAY};
pub use peer::{IceCandidate, PeerConnector, PeerLink, PeerObserver, SdpKind, SessionDescription};
pub use registry::{ChannelId, ChannelRegistry, OutboundChannel};
pub use rtc::RtcConnector;
pub use session::{Session, SessionId, SessionState};
pub use signal::{SignalMessage, SignalSink, SignalWriter};
pub use telemetry::{ActiveRecord, GpsFix, MarkerFix, Orientation, Record};
pub use trigger::BroadcastTrigger;
