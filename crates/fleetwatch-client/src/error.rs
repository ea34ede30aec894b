//! Client error types.
//!
//! None of these reach callers of `start`, `stop` or `fetch_snapshot`: the
//! client logs them and turns them into state transitions, signals, or
//! fallback snapshots. They surface from the [`Connector`](crate::Connector)
//! and [`SnapshotSource`](crate::SnapshotSource) seams and from config loading.

use std::path::PathBuf;
use std::time::Duration;

/// The connection to the backend failed or dropped.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("connection closed")]
    Closed,
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Client configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
