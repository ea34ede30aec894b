//! Point-in-time fleet snapshots.
//!
//! Snapshot bodies are decoded leniently: a missing or malformed field falls
//! back to a safe default instead of failing the whole snapshot. Only a body
//! that is not a JSON object at all is rejected.

use crate::{AgentId, DecodeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Agent status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Offline,
    Connecting,
}

impl AgentStatus {
    /// Parse a backend status label (case-insensitive).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "offline" => Some(Self::Offline),
            "connecting" => Some(Self::Connecting),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Offline => "offline",
            Self::Connecting => "connecting",
        }
    }

    /// Liveliness rank used for status ordering; higher is more alive.
    pub fn rank(self) -> u8 {
        match self {
            Self::Active => 3,
            Self::Idle => 2,
            Self::Offline | Self::Connecting => 1,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    /// Model identifier, e.g. `claude-sonnet-4-20250514`.
    pub model: String,
    /// Free-text description of what the agent is for.
    pub purpose: String,
    /// Messaging channel the agent is bound to; empty when unknown.
    pub channel: String,
    pub tokens_used: u64,
    /// Accrued cost in dollars.
    pub cost_accrued: f64,
    pub last_activity_at_ms: i64,
}

/// One scheduled job in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Cron expression.
    pub schedule: String,
    /// Delivery target (chat id or agent name).
    pub target: Option<String>,
    pub next_run_at_ms: Option<i64>,
    pub last_run_at_ms: Option<i64>,
}

/// Fleet-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub active_agents: u32,
    /// Enabled scheduled jobs.
    pub pending_tasks: u32,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub tokens_today: u64,
    /// Tokens per hour.
    pub burn_rate: u64,
}

/// A point-in-time read of the fleet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub agents: Vec<AgentSummary>,
    pub jobs: Vec<JobSummary>,
    pub stats: AggregateStats,
    pub fetched_at_ms: i64,
    /// `true` when freshly fetched from the backend, `false` for fallback data.
    pub is_live: bool,
}

impl FleetSnapshot {
    /// Decode a snapshot body. Decoded snapshots are marked live.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let Value::Object(body) = serde_json::from_str::<Value>(text)? else {
            return Err(DecodeError::NotAnObject);
        };

        let agents = decode_agents(body.get("agents"));
        let jobs = decode_jobs(first(&body, &["jobs", "cronJobs"]));
        let stats = match body.get("stats") {
            Some(Value::Object(stats)) => decode_stats(stats),
            _ => AggregateStats::from_fleet(&agents, &jobs),
        };
        let fetched_at_ms = body
            .get("timestamp")
            .and_then(read_ms)
            .unwrap_or_else(crate::now_ms);

        Ok(Self {
            agents,
            jobs,
            stats,
            fetched_at_ms,
            is_live: true,
        })
    }

    /// This snapshot re-marked as fallback data.
    pub fn into_fallback(self) -> Self {
        Self {
            is_live: false,
            ..self
        }
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentSummary> {
        self.agents.iter().find(|agent| &agent.id == id)
    }

    /// Scheduled jobs delivering to the given agent's chat.
    ///
    /// A job targets an agent when its delivery target is the last segment of
    /// the agent's session key (the chat id), or the owner name for the
    /// owner's main session.
    pub fn jobs_for(&self, id: &AgentId) -> Vec<&JobSummary> {
        let chat = id.as_str().rsplit(':').next().unwrap_or_default();
        self.jobs
            .iter()
            .filter(|job| match job.target.as_deref() {
                Some(target) => target == chat || Some(target) == id.owner().filter(|_| id.channel().is_none()),
                None => false,
            })
            .collect()
    }
}

fn decode_agents(value: Option<&Value>) -> Vec<AgentSummary> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut agents = Vec::with_capacity(items.len());
    for item in items {
        let Some(fields) = item.as_object() else {
            tracing::warn!("Skipping non-object agent entry");
            continue;
        };
        let Some(id) = fields.get("id").and_then(Value::as_str).and_then(|s| s.parse::<AgentId>().ok())
        else {
            tracing::warn!("Skipping agent without an id");
            continue;
        };
        if !seen.insert(id.clone()) {
            tracing::warn!("Skipping duplicate agent {}", id);
            continue;
        }
        agents.push(decode_agent(id, fields));
    }
    agents
}

fn decode_agent(id: AgentId, fields: &Map<String, Value>) -> AgentSummary {
    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
    let status = match fields.get("status").and_then(Value::as_str) {
        Some(label) => AgentStatus::parse(label).unwrap_or_else(|| {
            tracing::debug!("Agent {} has unknown status '{}', treating as offline", id, label);
            AgentStatus::Offline
        }),
        None => AgentStatus::Offline,
    };
    let channel = text("channel")
        .or_else(|| id.channel().map(str::to_string))
        .unwrap_or_default();

    AgentSummary {
        name: text("name").unwrap_or_else(|| id.to_string()),
        status,
        model: text("model").unwrap_or_else(|| "unknown".to_string()),
        purpose: text("purpose").unwrap_or_default(),
        channel,
        tokens_used: first(fields, &["tokensUsed", "tokens"]).and_then(read_u64).unwrap_or(0),
        cost_accrued: first(fields, &["costAccrued", "cost", "costToday"])
            .and_then(read_f64)
            .unwrap_or(0.0),
        last_activity_at_ms: first(fields, &["lastActivityAtMs", "lastActivity"])
            .and_then(read_ms)
            .unwrap_or(0),
        id,
    }
}

fn decode_jobs(value: Option<&Value>) -> Vec<JobSummary> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let fields = item.as_object()?;
            let id = fields.get("id").and_then(Value::as_str).filter(|s| !s.is_empty());
            let Some(id) = id else {
                tracing::warn!("Skipping job without an id");
                return None;
            };
            let state = fields.get("state").and_then(Value::as_object);
            let schedule = match fields.get("schedule") {
                Some(Value::String(expr)) => expr.clone(),
                Some(Value::Object(schedule)) => schedule
                    .get("expr")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            let target = fields
                .get("delivery")
                .and_then(|d| d.get("to"))
                .or_else(|| fields.get("target"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let run_at = |key: &str| {
                fields
                    .get(key)
                    .or_else(|| state.and_then(|s| s.get(key)))
                    .and_then(read_ms)
            };

            Some(JobSummary {
                id: id.to_string(),
                name: fields
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(id)
                    .to_string(),
                enabled: fields.get("enabled").and_then(Value::as_bool).unwrap_or(true),
                schedule,
                target,
                next_run_at_ms: run_at("nextRunAtMs"),
                last_run_at_ms: run_at("lastRunAtMs"),
            })
        })
        .collect()
}

fn decode_stats(fields: &Map<String, Value>) -> AggregateStats {
    let count = |key: &str| fields.get(key).and_then(read_u64).unwrap_or(0);
    AggregateStats {
        active_agents: u32::try_from(count("activeAgents")).unwrap_or(u32::MAX),
        pending_tasks: u32::try_from(count("pendingTasks")).unwrap_or(u32::MAX),
        total_cost: fields.get("totalCost").and_then(read_f64).unwrap_or(0.0),
        total_tokens: count("totalTokens"),
        tokens_today: count("tokensToday"),
        burn_rate: count("burnRate"),
    }
}

fn first<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| fields.get(*key))
}

/// Non-negative number, or a numeric string. Negative values clamp to zero.
fn read_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n.max(0.0))
}

fn read_u64(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    read_f64(value).map(|n| n.round() as u64)
}

/// Epoch milliseconds from a number or an RFC 3339 timestamp.
fn read_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp_millis())
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok()),
        _ => None,
    }
}
