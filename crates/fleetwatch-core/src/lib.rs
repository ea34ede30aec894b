//! Core types for Fleetwatch.
//!
//! This crate holds the value types shared between the realtime client and
//! its consumers: fleet snapshots, inbound fleet events, and the pure
//! analytics that run over them. Nothing here touches the network.

pub mod analytics;
mod event;
mod identity;
mod snapshot;

pub use event::{EventKind, FleetEvent, Inbound, Severity};
pub use identity::{AgentId, AgentIdParseError};
pub use snapshot::{AgentStatus, AgentSummary, AggregateStats, FleetSnapshot, JobSummary};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to be. Initial and terminal state.
    Disconnected,
    /// A transport open is in flight.
    Connecting,
    /// Transport is open and events are flowing.
    Open,
    /// Transport dropped; a retry is pending.
    Closed,
}

impl ConnectionState {
    /// Whether `start` should kick off a new connect from this state.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Disconnected | Self::Closed)
    }
}

/// Error decoding an inbound message or snapshot body.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a json object")]
    NotAnObject,
    #[error("message has no 'type' tag")]
    MissingType,
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Milliseconds since the unix epoch, from the local clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
