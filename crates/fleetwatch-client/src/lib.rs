//! Realtime client for the Fleetwatch backend.
//!
//! [`RealtimeFleetClient`] keeps one live event connection open with a bounded
//! number of fixed-delay retries, dispatches typed [`FleetEvent`]s to
//! subscribers, and fetches [`FleetSnapshot`]s that degrade to caller-supplied
//! fallback data instead of failing.
//!
//! ```ignore
//! use fleetwatch_client::{ClientConfig, ClientSignal, EventKind, RealtimeFleetClient};
//!
//! let client = RealtimeFleetClient::new(ClientConfig::load("fleetwatch.toml")?);
//! client.subscribe(EventKind::CostAlert, |event| tracing::warn!("{:?}", event));
//! client.start();
//! client.start_health_checks();
//! client.send(&serde_json::json!({ "type": "subscribe", "channel": "costs" }));
//!
//! let snapshot = client.fetch_snapshot(cached).await;
//! if !snapshot.is_live {
//!     // render the offline indicator
//! }
//! ```

mod client;
mod config;
mod error;
mod subscription;
mod transport;

pub use client::{ClientSignal, RealtimeFleetClient};
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{ConfigError, TransportError};
pub use subscription::{SubscriptionId, Topic};
pub use transport::{
    Connection, Connector, FrameSink, FrameStream, HttpSnapshotSource, Outgoing, SnapshotSource,
    WsConnector,
};

pub use fleetwatch_core::{
    AgentId, AgentStatus, AgentSummary, AggregateStats, ConnectionState, EventKind, FleetEvent,
    FleetSnapshot, JobSummary, Severity,
};
