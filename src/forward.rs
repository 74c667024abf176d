use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Upstream session state as seen by the distribution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Starting,
    Ready,
}

/// Which half of a track's packet pair a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFlow {
    Rtp,
    Rtcp,
}

impl fmt::Display for TrackFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackFlow::Rtp => write!(f, "RTP"),
            TrackFlow::Rtcp => write!(f, "RTCP"),
        }
    }
}

/// The description served to subscribers: the filtered bytes plus their
/// parsed form.
pub struct ServerSdp {
    pub raw: Vec<u8>,
    pub parsed: sdp_types::Session,
}

/// A downstream client held by the distribution layer. `forward` must not
/// block the caller.
pub trait Subscriber: Send + Sync {
    fn path(&self) -> &str;
    fn forward(&self, track_id: usize, flow: TrackFlow, payload: &[u8]);
    fn close(&self);
}

/// The narrow handle a stream holds into the distribution layer.
///
/// State and description mutations happen under the layer's writer lock;
/// packet forwarding takes the reader lock.
#[async_trait]
pub trait DistributionBridge: Send + Sync {
    /// Stores the upstream and subscriber-facing descriptions for `path`.
    async fn publish_description(&self, path: &str, client_sdp: Vec<u8>, server_sdp: ServerSdp);

    /// Marks `path` live. Only called once the description is published
    /// and transport setup is complete.
    async fn set_ready(&self, path: &str);

    /// Rolls `path` back to Starting, dropping its descriptions and
    /// closing every subscriber on the path exactly once.
    async fn reset(&self, path: &str);

    /// Delivers one packet to all subscribers on `path`.
    async fn forward_track(&self, path: &str, track_id: usize, flow: TrackFlow, payload: &[u8]);
}

struct Publication {
    state: StreamState,
    client_sdp: Option<Vec<u8>>,
    server_sdp: Option<ServerSdp>,
}

impl Default for Publication {
    fn default() -> Self {
        Self {
            state: StreamState::Starting,
            client_sdp: None,
            server_sdp: None,
        }
    }
}

#[derive(Default)]
struct HubInner {
    streams: HashMap<String, Publication>,
    subscribers: Vec<Arc<dyn Subscriber>>,
}

/// In-process distribution layer: one reader/writer lock over stream
/// publications and the subscriber set.
#[derive(Default)]
pub struct Hub {
    inner: RwLock<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscriber(&self, subscriber: Arc<dyn Subscriber>) {
        let mut inner = self.inner.write().await;
        debug!("subscriber added for path {}", subscriber.path());
        inner.subscribers.push(subscriber);
    }

    pub async fn state(&self, path: &str) -> Option<StreamState> {
        let inner = self.inner.read().await;
        inner.streams.get(path).map(|p| p.state)
    }

    /// Raw server-side SDP for `path`, if the stream has described.
    pub async fn server_sdp(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        inner
            .streams
            .get(path)
            .and_then(|p| p.server_sdp.as_ref())
            .map(|sdp| sdp.raw.clone())
    }

    /// The upstream's own SDP for `path`, as received on DESCRIBE.
    pub async fn client_sdp(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        inner.streams.get(path).and_then(|p| p.client_sdp.clone())
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }
}

#[async_trait]
impl DistributionBridge for Hub {
    async fn publish_description(&self, path: &str, client_sdp: Vec<u8>, server_sdp: ServerSdp) {
        let mut inner = self.inner.write().await;
        let publication = inner.streams.entry(path.to_string()).or_default();
        publication.client_sdp = Some(client_sdp);
        publication.server_sdp = Some(server_sdp);
    }

    async fn set_ready(&self, path: &str) {
        let mut inner = self.inner.write().await;
        if let Some(publication) = inner.streams.get_mut(path) {
            publication.state = StreamState::Ready;
        }
    }

    async fn reset(&self, path: &str) {
        let mut inner = self.inner.write().await;
        if let Some(publication) = inner.streams.get_mut(path) {
            publication.state = StreamState::Starting;
            publication.client_sdp = None;
            publication.server_sdp = None;
        }
        let before = inner.subscribers.len();
        inner.subscribers.retain(|subscriber| {
            if subscriber.path() == path {
                subscriber.close();
                false
            } else {
                true
            }
        });
        let evicted = before - inner.subscribers.len();
        if evicted > 0 {
            info!("[STREAM {path}] evicted {evicted} subscribers");
        }
    }

    async fn forward_track(&self, path: &str, track_id: usize, flow: TrackFlow, payload: &[u8]) {
        let inner = self.inner.read().await;
        for subscriber in inner.subscribers.iter() {
            if subscriber.path() == path {
                subscriber.forward(track_id, flow, payload);
            }
        }
    }
}
