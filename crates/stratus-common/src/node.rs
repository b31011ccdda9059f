use serde::{Deserialize, Serialize};

/// Lifecycle state of a GPU worker node.
///
/// `Terminated`, `Failed` and `Dead` are terminal: registry queries for
/// "live" nodes exclude exactly these three.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Provisioning,
    Active,
    Suspect,
    Degraded,
    Draining,
    Stopped,
    Dead,
    Failed,
    Terminated,
    Unknown,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Terminated | NodeState::Failed | NodeState::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Provisioning => "provisioning",
            NodeState::Active => "active",
            NodeState::Suspect => "suspect",
            NodeState::Degraded => "degraded",
            NodeState::Draining => "draining",
            NodeState::Stopped => "stopped",
            NodeState::Dead => "dead",
            NodeState::Failed => "failed",
            NodeState::Terminated => "terminated",
            NodeState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single provisioned GPU worker instance.
///
/// Owned by the registry. The safety monitor writes `status`,
/// `health_score` and `last_heartbeat_ms`; the reconciler writes
/// `status`/`status_message`; the deployment controller creates and
/// terminates rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    /// Owning deployment, if this node was launched by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,

    pub model_name: String,
    pub provider: String,
    pub region: String,
    pub gpu_type: String,

    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,

    /// Cluster name in the external provisioning service. Unique; the
    /// reconciler keys its diff on this.
    pub cluster_name: String,

    pub status: NodeState,

    #[serde(default)]
    pub status_message: String,

    #[serde(default)]
    pub health_score: f64,

    /// Advertised base URL for liveness checks (`{endpoint}/health`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub last_heartbeat_ms: u64,

    #[serde(default)]
    pub created_at_ms: u64,

    /// Async request id while a launch or terminate is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_request_id: Option<String>,
}

fn default_gpu_count() -> u32 {
    1
}
