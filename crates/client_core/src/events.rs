use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use shared::protocol::DrosseEvent;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

pub type EventStream = BoxStream<'static, DrosseEvent>;

#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("host url must start with http(s):// or ws(s)://, got '{0}'")]
    InvalidUrl(String),
    #[error("failed to connect event stream {url}: {reason}")]
    Connect { url: String, reason: String },
}

/// Push channel of drosse lifecycle and traffic events.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self) -> Result<EventStream, EventSourceError>;
}

/// In-process event source, events are only seen by streams subscribed
/// before they were emitted.
#[derive(Clone)]
pub struct ChannelEventSource {
    tx: broadcast::Sender<DrosseEvent>,
}

impl ChannelEventSource {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers received the event.
    pub fn emit(&self, event: DrosseEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn sender(&self) -> broadcast::Sender<DrosseEvent> {
        self.tx.clone()
    }
}

impl From<broadcast::Sender<DrosseEvent>> for ChannelEventSource {
    fn from(tx: broadcast::Sender<DrosseEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn subscribe(&self) -> Result<EventStream, EventSourceError> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(error = %err, "event subscriber lagged; events dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Event stream served by the host at `GET /events`.
pub struct WsEventSource {
    url: String,
}

impl WsEventSource {
    pub fn new(host_url: &str) -> Result<Self, EventSourceError> {
        Ok(Self {
            url: websocket_url(host_url)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn websocket_url(host_url: &str) -> Result<String, EventSourceError> {
    let base = host_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(EventSourceError::InvalidUrl(host_url.to_string()));
    };
    Ok(format!("{ws_base}/events"))
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn subscribe(&self) -> Result<EventStream, EventSourceError> {
        let (ws_stream, _) =
            connect_async(&self.url)
                .await
                .map_err(|err| EventSourceError::Connect {
                    url: self.url.clone(),
                    reason: err.to_string(),
                })?;
        debug!(url = %self.url, "event stream connected");
        let (_, reader) = ws_stream.split();

        let url = self.url.clone();
        let stream = reader.filter_map(move |frame| {
            let url = url.clone();
            async move {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<DrosseEvent>(&text) {
                        Ok(event) => Some(event),
                        Err(err) => {
                            warn!(%url, error = %err, "skipping undecodable drosse event");
                            None
                        }
                    },
                    Ok(_) => None,
                    Err(err) => {
                        warn!(%url, error = %err, "event stream read failed");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
