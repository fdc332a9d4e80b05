use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::telemetry;

/// Process-unique handle identity for an outbound data channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dc-{}", self.0)
    }
}

/// An outbound data channel as seen by the fan-out.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Current ready state as reported by the peer connection.
    fn is_open(&self) -> bool;

    async fn send_text(&self, payload: &str) -> Result<(), RelayError>;
}

/// The set of open data channels every telemetry record is fanned out to.
///
/// One lock guards membership and the whole broadcast loop, so a record is
/// always delivered against a consistent snapshot of the set.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<ChannelId, Arc<dyn OutboundChannel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, channel: Arc<dyn OutboundChannel>) {
        let id = channel.id();
        let mut channels = self.channels.lock().await;
        channels.insert(id, channel);
        debug!("Registered {} ({} open)", id, channels.len());
    }

    /// Returns whether the channel was a member. Removing twice is fine.
    pub async fn remove(&self, id: ChannelId) -> bool {
        let mut channels = self.channels.lock().await;
        let removed = channels.remove(&id).is_some();
        if removed {
            debug!("Removed {} ({} open)", id, channels.len());
        }
        removed
    }

    pub async fn contains(&self, id: ChannelId) -> bool {
        self.channels.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Serialize `record` once and send it to every member reporting open.
    /// Returns how many channels accepted the payload.
    pub async fn broadcast<R: Serialize + ?Sized>(&self, record: &R) -> Result<usize, RelayError> {
        let payload = telemetry::encode(record)?;

        let channels = self.channels.lock().await;
        let mut delivered = 0;
        for channel in channels.values() {
            // a close notification may still be in flight
            if !channel.is_open() {
                continue;
            }
            match channel.send_text(&payload).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to send telemetry on {}: {}", channel.id(), e),
            }
        }
        Ok(delivered)
    }
}
