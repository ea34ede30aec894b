//! Agent identifiers.
//!
//! Session-backed agents are keyed `agent:<owner>:<channel>:...`, for example
//! `agent:main:telegram:group:-5251868903`. The main session of an owner is
//! `agent:<owner>:<owner>`. Other backends may use any opaque non-empty string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A unique agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owner segment of a session key (`agent:<owner>:...`).
    pub fn owner(&self) -> Option<&str> {
        let mut parts = self.0.split(':');
        match (parts.next(), parts.next()) {
            (Some("agent"), Some(owner)) if !owner.is_empty() => Some(owner),
            _ => None,
        }
    }

    /// The messaging channel encoded in a session key, if any.
    ///
    /// The owner's main session (`agent:main:main`) has no channel.
    pub fn channel(&self) -> Option<&str> {
        let mut parts = self.0.split(':');
        let (Some("agent"), Some(owner), Some(channel)) = (parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if channel.is_empty() || (channel == owner && parts.next().is_none()) {
            return None;
        }
        Some(channel)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = AgentIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AgentIdParseError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for AgentId {
    type Error = AgentIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// Error parsing an agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentIdParseError {
    #[error("agent id cannot be empty")]
    Empty,
}
