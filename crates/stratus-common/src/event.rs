use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::now_ms;

/// Namespaced event types published on the in-process bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "node.launched")]
    NodeLaunched,
    #[serde(rename = "node.terminated")]
    NodeTerminated,
    #[serde(rename = "node.health_changed")]
    NodeHealthChanged,
    #[serde(rename = "node.health_degraded")]
    NodeHealthDegraded,
    #[serde(rename = "node.draining")]
    NodeDraining,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NodeLaunched => "node.launched",
            EventType::NodeTerminated => "node.terminated",
            EventType::NodeHealthChanged => "node.health_changed",
            EventType::NodeHealthDegraded => "node.health_degraded",
            EventType::NodeDraining => "node.draining",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable lifecycle fact, fanned out to subscribers and never
/// persisted by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub at_ms: u64,

    /// Tenant scope; `None` for system events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, tenant_id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            at_ms: now_ms(),
            tenant_id,
            payload,
        }
    }
}
