use std::sync::Arc;

use log::{error, info};

use crate::config::FeedConfig;
use crate::ingest::Ingestor;
use crate::registry::{ChannelId, ChannelRegistry, OutboundChannel};
use crate::telemetry::Record;
use crate::trigger::BroadcastTrigger;

type Launch = dyn Fn(Arc<ChannelRegistry>) + Send + Sync;

/// Shared relay state handed to every signaling session: the channel
/// registry plus the one-shot gate that starts the feed ingestor.
#[derive(Clone)]
pub struct Context {
    pub registry: Arc<ChannelRegistry>,
    trigger: Arc<BroadcastTrigger>,
    launch: Arc<Launch>,
}

impl Context {
    /// Context whose first open data channel spawns an [`Ingestor`] for `feed`.
    pub fn for_feed<R: Record>(feed: FeedConfig) -> Self {
        Self::with_launcher(move |registry| {
            let ingestor = Ingestor::<R>::new(feed.clone(), registry);
            info!("Starting {} feed ingestor for {}", feed.transport, feed.endpoint());
            tokio::spawn(async move {
                if let Err(e) = ingestor.run().await {
                    error!("Feed ingestor stopped: {}", e);
                }
            });
        })
    }

    /// Context with a custom ingestor launcher. It runs at most once.
    pub fn with_launcher<F>(launch: F) -> Self
    where
        F: Fn(Arc<ChannelRegistry>) + Send + Sync + 'static,
    {
        Self {
            registry: Arc::new(ChannelRegistry::new()),
            trigger: Arc::new(BroadcastTrigger::new()),
            launch: Arc::new(launch),
        }
    }

    /// Register a freshly opened channel, then start the ingestor if no
    /// session has done so yet.
    pub async fn channel_opened(&self, channel: Arc<dyn OutboundChannel>) {
        self.registry.add(channel).await;
        self.trigger.fire(|| (self.launch)(Arc::clone(&self.registry)));
    }

    pub async fn channel_closed(&self, id: ChannelId) {
        self.registry.remove(id).await;
    }

    pub fn ingestor_started(&self) -> bool {
        self.trigger.has_fired()
    }
}
