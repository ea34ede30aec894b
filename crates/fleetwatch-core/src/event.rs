//! Inbound fleet events.
//!
//! The backend pushes one JSON object per frame, tagged by `type`. Frames are
//! decoded once here into a closed [`FleetEvent`]; tags this crate does not
//! know come back as [`Inbound::Ignored`] so callers can log and drop them.

use crate::{AgentId, AgentStatus, DecodeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An event pushed by the fleet backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FleetEvent {
    /// An agent moved to a new status.
    AgentStatusChanged { agent_id: AgentId, status: AgentStatus },
    /// A scheduled job ran.
    JobExecuted {
        job_id: String,
        succeeded: bool,
        detail: Option<String>,
    },
    /// Spend crossed a threshold the backend watches.
    CostAlert { message: String, amount: f64 },
    /// Free-form notice from the backend.
    SystemNotice { message: String, severity: Severity },
}

impl FleetEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AgentStatusChanged { .. } => EventKind::AgentStatusChanged,
            Self::JobExecuted { .. } => EventKind::JobExecuted,
            Self::CostAlert { .. } => EventKind::CostAlert,
            Self::SystemNotice { .. } => EventKind::SystemNotice,
        }
    }
}

/// Discriminant of [`FleetEvent`], used to subscribe to one kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentStatusChanged,
    JobExecuted,
    CostAlert,
    SystemNotice,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        Self::AgentStatusChanged,
        Self::JobExecuted,
        Self::CostAlert,
        Self::SystemNotice,
    ];

    /// The `type` tag this kind arrives under.
    pub fn wire_tag(self) -> &'static str {
        match self {
            Self::AgentStatusChanged => "agent_status_update",
            Self::JobExecuted => "cron_job_executed",
            Self::CostAlert => "cost_alert",
            Self::SystemNotice => "system_notification",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_tag() == tag)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_tag())
    }
}

/// Severity of a [`FleetEvent::SystemNotice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Map a backend severity or priority label. Unknown labels are `Info`.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "urgent" | "critical" | "error" => Self::Error,
            "high" | "warning" | "warn" => Self::Warning,
            _ => Self::Info,
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(FleetEvent),
    /// A well-formed frame whose `type` is not a known event.
    Ignored(String),
}

impl Inbound {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
            return Err(DecodeError::NotAnObject);
        };
        let tag = match fields.remove("type") {
            Some(Value::String(tag)) => tag,
            _ => return Err(DecodeError::MissingType),
        };
        let Some(kind) = EventKind::from_wire_tag(&tag) else {
            return Ok(Self::Ignored(tag));
        };
        let body = Value::Object(fields);

        let event = match kind {
            EventKind::AgentStatusChanged => {
                let wire: StatusUpdate = serde_json::from_value(body)?;
                let agent_id = wire
                    .agent_id
                    .parse()
                    .map_err(|e| DecodeError::field("agentId", format!("{e}")))?;
                let status = AgentStatus::parse(&wire.status).ok_or_else(|| {
                    DecodeError::field("status", format!("unknown status '{}'", wire.status))
                })?;
                FleetEvent::AgentStatusChanged { agent_id, status }
            }
            EventKind::JobExecuted => {
                let wire: JobRun = serde_json::from_value(body)?;
                let (result_ok, result_detail) = wire.result.as_ref().map(read_result).unwrap_or_default();
                FleetEvent::JobExecuted {
                    job_id: wire.job_id,
                    succeeded: wire.succeeded.or(result_ok).unwrap_or(false),
                    detail: wire.detail.or(result_detail),
                }
            }
            EventKind::CostAlert => {
                let wire: CostAlert = serde_json::from_value(body)?;
                FleetEvent::CostAlert {
                    message: wire.message,
                    amount: wire.amount,
                }
            }
            EventKind::SystemNotice => {
                let wire: Notification = serde_json::from_value(body)?;
                FleetEvent::SystemNotice {
                    message: wire.message,
                    severity: wire
                        .severity
                        .as_deref()
                        .map(Severity::from_label)
                        .unwrap_or(Severity::Info),
                }
            }
        };
        Ok(Self::Event(event))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdate {
    agent_id: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRun {
    job_id: String,
    #[serde(default, alias = "success")]
    succeeded: Option<bool>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Deserialize)]
struct CostAlert {
    #[serde(default)]
    message: String,
    amount: f64,
}

#[derive(Deserialize)]
struct Notification {
    message: String,
    #[serde(default, alias = "priority")]
    severity: Option<String>,
}

/// Pull an outcome and a human-readable detail out of a job `result`.
fn read_result(result: &Value) -> (Option<bool>, Option<String>) {
    match result {
        Value::Bool(ok) => (Some(*ok), None),
        Value::String(text) => {
            let ok = matches!(
                text.to_ascii_lowercase().as_str(),
                "success" | "ok" | "succeeded"
            );
            (Some(ok), Some(text.clone()))
        }
        Value::Object(fields) => {
            let ok = fields
                .get("succeeded")
                .or_else(|| fields.get("success"))
                .and_then(Value::as_bool);
            let detail = ["message", "error", "output"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .or_else(|| Some(result.to_string()));
            (ok, detail)
        }
        Value::Null => (None, None),
        other => (None, Some(other.to_string())),
    }
}
