use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::RelayError;

/// A message on the signaling WebSocket. Carries either a JSON-encoded
/// session description or a JSON-encoded ICE candidate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
}

impl SignalMessage {
    pub fn with_sdp(sdp: impl Into<String>) -> Self {
        Self { sdp: Some(sdp.into()), candidate: None }
    }

    pub fn with_candidate(candidate: impl Into<String>) -> Self {
        Self { sdp: None, candidate: Some(candidate.into()) }
    }

    /// The SDP payload, if present and non-empty.
    pub fn sdp_payload(&self) -> Option<&str> {
        self.sdp.as_deref().filter(|s| !s.is_empty())
    }

    /// The candidate payload, if present and non-empty.
    pub fn candidate_payload(&self) -> Option<&str> {
        self.candidate.as_deref().filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.sdp_payload().is_none() && self.candidate_payload().is_none()
    }
}

/// Write half of one signaling connection.
#[async_trait]
pub trait SignalSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError>;
}

/// Serializes outbound signaling writes for one session; the underlying
/// connection does not allow concurrent writers.
pub struct SignalWriter {
    sink: Mutex<Box<dyn SignalSink>>,
}

impl SignalWriter {
    pub fn new<S: SignalSink + 'static>(sink: S) -> Self {
        Self { sink: Mutex::new(Box::new(sink)) }
    }

    pub async fn send(&self, msg: &SignalMessage) -> Result<(), RelayError> {
        let text = serde_json::to_string(msg)?;
        self.sink.lock().await.send_text(text).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// Sink that hands every outbound frame to a test-side receiver.
    pub(crate) struct ChannelSink(pub(crate) mpsc::UnboundedSender<String>);

    #[async_trait]
    impl SignalSink for ChannelSink {
        async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
            self.0.send(text).map_err(|_| RelayError::SignalClosed)
        }
    }

    #[tokio::test]
    async fn writer_sends_compact_json() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = SignalWriter::new(ChannelSink(tx));
        writer.send(&SignalMessage::with_sdp("x")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"sdp":"x"}"#);
    }

    #[tokio::test]
    async fn writer_reports_closed_sink() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let writer = SignalWriter::new(ChannelSink(tx));
        let err = writer.send(&SignalMessage::with_candidate("c")).await;
        assert!(matches!(err, Err(RelayError::SignalClosed)));
    }

    #[test]
    fn absent_fields_are_omitted() {
        let msg = SignalMessage::with_candidate("{\"candidate\":\"x\"}");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"candidate":"{\"candidate\":\"x\"}"}"#
        );
        assert_eq!(serde_json::to_string(&SignalMessage::default()).unwrap(), "{}");
    }

    #[test]
    fn empty_object_decodes_as_empty_message() {
        let msg: SignalMessage = serde_json::from_str("{}").unwrap();
        assert!(msg.is_empty());
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let msg: SignalMessage = serde_json::from_str(r#"{"sdp":"","candidate":""}"#).unwrap();
        assert!(msg.is_empty());
        assert_eq!(msg.sdp_payload(), None);
    }

    #[test]
    fn both_fields_are_kept() {
        let msg: SignalMessage = serde_json::from_str(r#"{"sdp":"a","candidate":"b"}"#).unwrap();
        assert_eq!(msg.sdp_payload(), Some("a"));
        assert_eq!(msg.candidate_payload(), Some("b"));
    }
}
