//! Agent records as reported by an agent registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque per-start configuration handed through to the registry
pub type AgentConfig = serde_json::Map<String, serde_json::Value>;

/// Agent status as observed by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Worker is up and reporting in
    Running,

    /// Worker is not running
    Stopped,

    /// Worker is suspended
    Paused,

    /// Worker crashed or reported a failure
    Failed,
}

/// Registry view of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent ID
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Current status
    pub status: AgentStatus,

    /// Last time the worker reported in
    pub last_seen: DateTime<Utc>,
}

impl AgentRecord {
    /// Create a stopped record last seen now
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: AgentStatus::Stopped,
            last_seen: Utc::now(),
        }
    }

    /// Whether the record was seen within `window` of `now`
    pub fn seen_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_seen) <= window
    }
}
