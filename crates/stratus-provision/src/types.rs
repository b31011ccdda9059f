use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors from the provisioning service.
///
/// `NotFound` is distinguished because terminate/status on an
/// already-gone cluster must be treated as success by callers: the
/// desired end state (absent) is already true.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("cluster not found")]
    NotFound,

    #[error("provisioning request timed out")]
    Timeout,

    #[error("provisioning api error: {0}")]
    Api(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// What to launch. The provisioning service turns this into one cloud
/// instance group named `cluster_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub node_id: String,
    pub cluster_name: String,
    pub provider: String,
    pub region: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub model_name: String,

    /// Spot capacity by default; the controller biases toward cheap.
    #[serde(default)]
    pub use_spot: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

/// One cluster as reported by the provisioning service. `status` keeps
/// the service's own vocabulary (`UP`, `INIT`, `PROVISIONING`,
/// `STOPPED`, `AUTOSTOPPED`, ...); mapping to node states happens at
/// the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_ip: Option<String>,
    /// Launch time, when the service reports one. Most deployments do
    /// not, which is why orphan termination defaults to immediate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launched_at_ms: Option<u64>,
}

/// Terminal state of an async provisioning request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Succeeded,
    Failed(String),
}

/// Black-box client for the external provisioning service. Launch and
/// terminate are async on the service side: they return an opaque
/// request id whose terminal state is obtained by polling.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, ProvisionError>;

    /// Idempotent: terminating an unknown cluster returns `NotFound`,
    /// which callers normalize to success.
    async fn terminate(&self, cluster_name: &str) -> Result<String, ProvisionError>;

    async fn status(&self, cluster_name: &str) -> Result<String, ProvisionError>;

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ProvisionError>;

    /// Poll a request id until it reaches a terminal state.
    async fn wait_for_request(
        &self,
        request_id: &str,
        poll_interval: Duration,
    ) -> Result<RequestStatus, ProvisionError>;

    /// Run a shell command on the cluster's head node.
    async fn exec_command(
        &self,
        cluster_name: &str,
        command: &str,
    ) -> Result<String, ProvisionError>;
}
