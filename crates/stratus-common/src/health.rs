use serde::{Deserialize, Serialize};

/// Where a health observation came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Pushed by the node agent.
    Heartbeat,
    /// Active liveness check from the monitor's poll loop.
    Poll,
    /// Derived from the provisioning service's cluster list.
    CloudApi,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Heartbeat => "heartbeat",
            SignalSource::Poll => "poll",
            SignalSource::CloudApi => "cloud_api",
        }
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source's opinion on a node's liveness. Only the most recent
/// signal per (node, source) is kept; last writer wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSignal {
    pub healthy: bool,
    pub at_ms: u64,
    pub source: SignalSource,
    pub message: String,
}
