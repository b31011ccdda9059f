use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use tokio::sync::RwLock;

use stratus_common::{Deployment, Node, NodeState};

use crate::types::Registry;

/// In-memory registry. The production deployment fronts a SQL store
/// behind the same trait; this implementation backs tests and dev mode.
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    deployments: HashMap<String, Deployment>,
    mutations: u64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Number of writes applied so far. Reconciliation idempotence tests
    /// assert this does not move across a no-op pass.
    pub async fn mutations(&self) -> u64 {
        self.inner.read().await.mutations
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    async fn create_node(&self, node: Node) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.mutations += 1;
        inner.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let inner = self.inner.read().await;
        Ok(inner.nodes.get(id).cloned())
    }

    async fn get_node_by_cluster(&self, cluster_name: &str) -> Result<Option<Node>> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .values()
            .find(|n| n.cluster_name == cluster_name)
            .cloned())
    }

    async fn list_live_nodes(&self) -> Result<Vec<Node>> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .values()
            .filter(|n| !n.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_nodes_in_states(&self, states: &[NodeState]) -> Result<Vec<Node>> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .values()
            .filter(|n| states.contains(&n.status))
            .cloned()
            .collect())
    }

    async fn active_nodes_for_model(&self, model_name: &str) -> Result<Vec<Node>> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.status == NodeState::Active && n.model_name == model_name)
            .cloned()
            .collect())
    }

    async fn count_deployment_nodes(&self, deployment_id: &str) -> Result<u32> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .values()
            .filter(|n| {
                n.deployment_id.as_deref() == Some(deployment_id) && !n.status.is_terminal()
            })
            .count() as u32)
    }

    async fn oldest_active_nodes(&self, deployment_id: &str, limit: usize) -> Result<Vec<Node>> {
        let inner = self.inner.read().await;
        let mut nodes: Vec<Node> = inner
            .nodes
            .values()
            .filter(|n| {
                n.deployment_id.as_deref() == Some(deployment_id)
                    && n.status == NodeState::Active
            })
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.created_at_ms);
        nodes.truncate(limit);
        Ok(nodes)
    }

    async fn update_node_status(
        &self,
        id: &str,
        status: NodeState,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(node) = inner.nodes.get_mut(id) else {
            return Ok(false);
        };
        node.status = status;
        if let Some(message) = message {
            node.status_message = message.to_string();
        }
        inner.mutations += 1;
        Ok(true)
    }

    async fn update_node_status_by_cluster(
        &self,
        cluster_name: &str,
        status: NodeState,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(node) = inner
            .nodes
            .values_mut()
            .find(|n| n.cluster_name == cluster_name)
        else {
            return Ok(false);
        };
        node.status = status;
        if let Some(message) = message {
            node.status_message = message.to_string();
        }
        inner.mutations += 1;
        Ok(true)
    }

    async fn record_heartbeat(&self, id: &str, health_score: f64, at_ms: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(node) = inner.nodes.get_mut(id) else {
            return Ok(false);
        };
        node.status = NodeState::Active;
        node.health_score = health_score;
        node.last_heartbeat_ms = at_ms;
        inner.mutations += 1;
        Ok(true)
    }

    async fn set_launch_request(&self, id: &str, request_id: Option<&str>) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(node) = inner.nodes.get_mut(id) else {
            return Ok(false);
        };
        node.launch_request_id = request_id.map(|s| s.to_string());
        inner.mutations += 1;
        Ok(true)
    }

    async fn upsert_deployment(&self, deployment: Deployment) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.mutations += 1;
        inner.deployments.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>> {
        let inner = self.inner.read().await;
        Ok(inner.deployments.get(id).cloned())
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        let inner = self.inner.read().await;
        Ok(inner.deployments.values().cloned().collect())
    }

    async fn set_current_replicas(&self, deployment_id: &str, count: u32) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(dep) = inner.deployments.get_mut(deployment_id) else {
            return Ok(false);
        };
        dep.current_replicas = count;
        inner.mutations += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_common::now_ms;

    fn make_node(id: &str, cluster: &str, status: NodeState) -> Node {
        Node {
            id: id.to_string(),
            deployment_id: Some("dep-1".to_string()),
            model_name: "qwen2.5-7b".to_string(),
            provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            gpu_type: "A10G".to_string(),
            gpu_count: 1,
            cluster_name: cluster.to_string(),
            status,
            status_message: String::new(),
            health_score: 1.0,
            endpoint: None,
            last_heartbeat_ms: 0,
            created_at_ms: now_ms(),
            launch_request_id: None,
        }
    }

    #[tokio::test]
    async fn test_live_nodes_exclude_terminal() {
        let reg = MemoryRegistry::new();
        reg.create_node(make_node("a", "c-a", NodeState::Active))
            .await
            .unwrap();
        reg.create_node(make_node("b", "c-b", NodeState::Terminated))
            .await
            .unwrap();
        reg.create_node(make_node("c", "c-c", NodeState::Dead))
            .await
            .unwrap();
        reg.create_node(make_node("d", "c-d", NodeState::Provisioning))
            .await
            .unwrap();

        let live = reg.list_live_nodes().await.unwrap();
        let mut ids: Vec<_> = live.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn test_heartbeat_reactivates_and_counts_mutation() {
        let reg = MemoryRegistry::new();
        reg.create_node(make_node("a", "c-a", NodeState::Suspect))
            .await
            .unwrap();
        let before = reg.mutations().await;

        assert!(reg.record_heartbeat("a", 0.9, 123).await.unwrap());
        assert!(!reg.record_heartbeat("ghost", 0.9, 123).await.unwrap());

        let node = reg.get_node("a").await.unwrap().unwrap();
        assert_eq!(node.status, NodeState::Active);
        assert_eq!(node.last_heartbeat_ms, 123);
        // Only the hit counted as a write.
        assert_eq!(reg.mutations().await, before + 1);
    }

    #[tokio::test]
    async fn test_oldest_active_ordering() {
        let reg = MemoryRegistry::new();
        let mut n1 = make_node("a", "c-a", NodeState::Active);
        n1.created_at_ms = 300;
        let mut n2 = make_node("b", "c-b", NodeState::Active);
        n2.created_at_ms = 100;
        let mut n3 = make_node("c", "c-c", NodeState::Active);
        n3.created_at_ms = 200;
        for n in [n1, n2, n3] {
            reg.create_node(n).await.unwrap();
        }

        let oldest = reg.oldest_active_nodes("dep-1", 2).await.unwrap();
        let ids: Vec<_> = oldest.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
