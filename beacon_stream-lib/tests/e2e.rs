//! End-to-end fan-out: signaling sessions open data channels, the first open
//! starts a real TCP feed ingestor, and every record reaches every open
//! channel.
//!
//! Run: `cargo test -p beacon_stream-lib --test e2e`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use beacon_stream_lib::{
    ChannelId, Context, FeedConfig, IceCandidate, MarkerFix, OutboundChannel, PeerConnector,
    PeerLink, PeerObserver, RelayError, SdpKind, Session, SessionDescription, SessionState,
    SignalMessage, SignalSink, SignalWriter, Transport,
};

// ── Fakes for the peer-connection capability ─────────────────────────

struct TestChannel {
    id: ChannelId,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl TestChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundChannel for TestChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, payload: &str) -> Result<(), RelayError> {
        self.sent.lock().unwrap().push(payload.to_owned());
        Ok(())
    }
}

struct AnsweringPeer;

#[async_trait]
impl PeerLink for AnsweringPeer {
    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), RelayError> {
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, RelayError> {
        Ok(SessionDescription::new(SdpKind::Answer, "v=0"))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), RelayError> {
        Ok(())
    }

    async fn gathering_complete(&self) {}

    async fn local_description(&self) -> Option<SessionDescription> {
        Some(SessionDescription::new(SdpKind::Answer, "v=0"))
    }

    async fn add_remote_candidate(&self, _candidate: IceCandidate) -> Result<(), RelayError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), RelayError> {
        Ok(())
    }
}

#[derive(Default)]
struct TestConnector {
    observers: Mutex<Vec<Arc<dyn PeerObserver>>>,
}

impl TestConnector {
    fn last_observer(&self) -> Arc<dyn PeerObserver> {
        self.observers.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PeerConnector for TestConnector {
    async fn connect(&self, observer: Arc<dyn PeerObserver>) -> Result<Arc<dyn PeerLink>, RelayError> {
        self.observers.lock().unwrap().push(observer);
        Ok(Arc::new(AnsweringPeer))
    }
}

struct NullSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl SignalSink for NullSink {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        self.0.send(text).map_err(|_| RelayError::SignalClosed)
    }
}

// ── Shared helpers ───────────────────────────────────────────────────

struct Client {
    session: Session,
    observer: Arc<dyn PeerObserver>,
    channel: Arc<TestChannel>,
    outbound: mpsc::UnboundedReceiver<String>,
}

async fn open_client(connector: &TestConnector, ctx: &Context) -> Client {
    let (tx, outbound) = mpsc::unbounded_channel();
    let writer = Arc::new(SignalWriter::new(NullSink(tx)));
    let session = Session::connect(connector, ctx.clone(), writer).await.unwrap();
    let observer = connector.last_observer();
    Client { session, observer, channel: TestChannel::new(), outbound }
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn record(marker_id: i64) -> MarkerFix {
    MarkerFix { marker_id, angle_x: 0.17, angle_y: 0.039, distance: 0.0 }
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn records_fan_out_to_every_open_channel() {
    let feed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = feed.local_addr().unwrap().port();
    let ctx = Context::for_feed::<MarkerFix>(FeedConfig::new(Transport::Tcp, "127.0.0.1", port));
    let connector = TestConnector::default();

    let mut a = open_client(&connector, &ctx).await;
    let b = open_client(&connector, &ctx).await;
    let c = open_client(&connector, &ctx).await;

    // negotiate the first client for real, the rest only open their channels
    a.session
        .handle(SignalMessage::with_sdp(r#"{"type":"offer","sdp":"v=0"}"#))
        .await;
    assert_eq!(a.session.state(), SessionState::Stable);
    let answer: SignalMessage = serde_json::from_str(&a.outbound.recv().await.unwrap()).unwrap();
    assert!(answer.sdp_payload().unwrap().contains(r#""type":"answer""#));

    assert!(!ctx.ingestor_started());
    a.observer.channel_open(a.channel.clone()).await;
    assert!(ctx.ingestor_started());
    b.observer.channel_open(b.channel.clone()).await;
    c.observer.channel_open(c.channel.clone()).await;

    let (mut upstream, _) = timeout(Duration::from_secs(5), feed.accept())
        .await
        .expect("ingestor never connected")
        .unwrap();

    let first = serde_json::to_string(&record(500)).unwrap();
    upstream.write_all(format!("{first}\n").as_bytes()).await.unwrap();
    wait_until("first record", || {
        a.channel.sent().len() == 1 && b.channel.sent().len() == 1 && c.channel.sent().len() == 1
    })
    .await;
    assert_eq!(
        a.channel.sent(),
        vec![r#"{"markerId":500,"angle_x":0.17,"angle_y":0.039,"distance":0}"#.to_string()]
    );
    assert_eq!(a.channel.sent(), b.channel.sent());

    c.observer.channel_closed(c.channel.id()).await;
    assert!(!ctx.registry.contains(c.channel.id()).await);

    upstream.write_all(b"{\"markerId\":\"bad\"}\n").await.unwrap();
    let second = serde_json::to_string(&record(501)).unwrap();
    upstream.write_all(format!("{second}\n").as_bytes()).await.unwrap();
    wait_until("second record", || {
        a.channel.sent().len() == 2 && b.channel.sent().len() == 2
    })
    .await;

    assert_eq!(a.channel.sent(), b.channel.sent());
    assert_eq!(c.channel.sent().len(), 1);
    assert_eq!(ctx.registry.len().await, 2);
}

#[tokio::test]
async fn ending_a_session_drops_its_channel() {
    let feed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = feed.local_addr().unwrap().port();
    let ctx = Context::for_feed::<MarkerFix>(FeedConfig::new(Transport::Tcp, "127.0.0.1", port));
    let connector = TestConnector::default();

    let mut a = open_client(&connector, &ctx).await;
    a.observer.channel_open(a.channel.clone()).await;
    assert_eq!(ctx.registry.len().await, 1);

    let inbound = futures::stream::iter(vec![Err::<Vec<u8>, _>(RelayError::SignalClosed)]);
    a.session.run(inbound).await;

    assert_eq!(a.session.state(), SessionState::Closed);
    assert!(ctx.registry.is_empty().await);
    // the ingestor keeps running for later sessions
    assert!(ctx.ingestor_started());
}
