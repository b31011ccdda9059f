use anyhow::Result;
use async_trait::async_trait;

use stratus_common::{Deployment, Node, NodeState};

/// Read/write contract the control plane needs from persistence.
///
/// "Live" queries exclude terminal nodes (`terminated`, `failed`,
/// `dead`). Mutating methods that target a single row return `false`
/// when no such row exists, so callers can distinguish not-found from
/// storage failure without a dedicated error variant.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn create_node(&self, node: Node) -> Result<()>;
    async fn get_node(&self, id: &str) -> Result<Option<Node>>;
    async fn get_node_by_cluster(&self, cluster_name: &str) -> Result<Option<Node>>;

    /// All non-terminal nodes.
    async fn list_live_nodes(&self) -> Result<Vec<Node>>;

    /// Nodes currently in any of the given states.
    async fn list_nodes_in_states(&self, states: &[NodeState]) -> Result<Vec<Node>>;

    /// Active nodes serving a model (cache warm-up targets).
    async fn active_nodes_for_model(&self, model_name: &str) -> Result<Vec<Node>>;

    /// Count of non-terminal nodes belonging to a deployment.
    async fn count_deployment_nodes(&self, deployment_id: &str) -> Result<u32>;

    /// Active nodes of a deployment, oldest `created_at_ms` first,
    /// capped to `limit`. Scale-down picks its victims here.
    async fn oldest_active_nodes(&self, deployment_id: &str, limit: usize) -> Result<Vec<Node>>;

    /// Write status (and message, when `Some`) by node id.
    async fn update_node_status(
        &self,
        id: &str,
        status: NodeState,
        message: Option<&str>,
    ) -> Result<bool>;

    /// Write status (and message, when `Some`) by cluster name.
    async fn update_node_status_by_cluster(
        &self,
        cluster_name: &str,
        status: NodeState,
        message: Option<&str>,
    ) -> Result<bool>;

    /// Heartbeat ingestion: unconditionally sets status to `active`,
    /// updates the health score and last-heartbeat timestamp.
    async fn record_heartbeat(&self, id: &str, health_score: f64, at_ms: u64) -> Result<bool>;

    /// Track (or clear) the async provisioning request currently in
    /// flight for a node.
    async fn set_launch_request(&self, id: &str, request_id: Option<&str>) -> Result<bool>;

    async fn upsert_deployment(&self, deployment: Deployment) -> Result<()>;
    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>>;
    async fn list_deployments(&self) -> Result<Vec<Deployment>>;

    /// Best-effort correction of the cached replica count.
    async fn set_current_replicas(&self, deployment_id: &str, count: u32) -> Result<bool>;
}
