use thiserror::Error;

/// Errors returned by the relay's signaling, fan-out and ingest paths.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upstream WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Signaling transport error: {0}")]
    Signal(String),

    #[error("Signaling connection closed")]
    SignalClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}
