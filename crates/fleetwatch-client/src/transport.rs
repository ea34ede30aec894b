//! Transport seams: the live event stream and the snapshot endpoint.

use crate::error::TransportError;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Text frames from an open connection. The stream ends when the remote
/// closes; an `Err` item means the connection broke.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Writes to an open connection.
pub type FrameSink = Pin<Box<dyn Sink<Outgoing, Error = TransportError> + Send>>;

/// A frame the client writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    /// Ask the remote to close the connection.
    Close,
}

/// Both halves of an open event connection.
pub struct Connection {
    pub frames: FrameStream,
    pub sink: FrameSink,
}

/// Opens the event connection.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Connection, TransportError>> + Send;
}

/// Reads one HTTP body: a snapshot, or a health check.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// WebSocket event stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!("WebSocket handshake with {} complete", url);
        let (write, read) = ws.split();

        let sink = write.sink_map_err(TransportError::from).with(|out: Outgoing| {
            future::ready(Ok::<_, TransportError>(match out {
                Outgoing::Text(text) => Message::Text(text.into()),
                Outgoing::Close => Message::Close(None),
            }))
        });
        let frames = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Close frame received: {:?}", frame);
                    None
                }
                Ok(Message::Binary(data)) => {
                    tracing::debug!("Skipping {} byte binary frame", data.len());
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });
        Ok(Connection {
            frames: Box::pin(frames),
            sink: Box::pin(sink),
        })
    }
}

/// HTTP snapshot endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpSnapshotSource {
    http: reqwest::Client,
}

impl HttpSnapshotSource {
    /// A source whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, url: &str) -> Result<String, TransportError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}
