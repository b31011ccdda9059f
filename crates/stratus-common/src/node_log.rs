use serde::{Deserialize, Serialize};

/// Phase of a node's launch journey.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaunchPhase {
    Queued,
    Provisioning,
    InstanceReady,
    Installing,
    ModelLoading,
    HealthCheck,
    Active,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of a node's launch log. Entries are append-only and expire
/// with the node's log bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLogEntry {
    /// Fill with `now_ms()` when 0 at append time.
    #[serde(default)]
    pub at_ms: u64,

    pub level: NodeLogLevel,
    pub message: String,
    pub phase: LaunchPhase,

    /// Launch progress 0..=100, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
