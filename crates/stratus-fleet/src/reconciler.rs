use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use stratus_common::{now_ms, HealthSignal, Node, NodeState, SignalSource};
use stratus_provision::{ClusterInfo, ProvisionError, Provisioner};
use stratus_registry::Registry;

use crate::monitor::TripleSafetyMonitor;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Cadence of the diff-and-repair cycle. One extra pass always runs
    /// at startup.
    pub interval: Duration,
    /// Terminate clusters that exist externally with no local record.
    pub auto_terminate_orphans: bool,
    /// Minimum age before an orphan is terminated. Only enforceable
    /// when the provisioning service reports a launch timestamp, which
    /// it usually does not; 0 means terminate immediately.
    pub orphan_grace_ms: u64,
    /// Only clusters with this name prefix belong to the fleet.
    pub cluster_prefix: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            auto_terminate_orphans: true,
            orphan_grace_ms: 0,
            cluster_prefix: "stratus-".to_string(),
        }
    }
}

/// What one pass did. Feeds metrics and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub orphans_terminated: u32,
    pub ghosts_marked: u32,
    pub statuses_synced: u32,
}

/// Keeps the registry converged with the provisioning service's view of
/// the cloud. Detects orphans (external cluster, no local row), ghosts
/// (local row, no external cluster) and status drift, and feeds the
/// `cloud_api` signal layer of the safety monitor.
///
/// Passes are idempotent: every repair moves local state toward
/// observed truth, never applies a relative delta, so interleaved or
/// repeated passes are safe.
pub struct StateReconciler {
    registry: Arc<dyn Registry>,
    provisioner: Arc<dyn Provisioner>,
    monitor: Arc<TripleSafetyMonitor>,
    cfg: ReconcilerConfig,
}

impl StateReconciler {
    pub fn new(
        registry: Arc<dyn Registry>,
        provisioner: Arc<dyn Provisioner>,
        monitor: Arc<TripleSafetyMonitor>,
        cfg: ReconcilerConfig,
    ) -> Self {
        Self {
            registry,
            provisioner,
            monitor,
            cfg,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.cfg
    }

    /// One diff-and-repair pass. A failure to read either side aborts
    /// with no side effects; the next tick retries from scratch.
    pub async fn reconcile_once(&self) -> anyhow::Result<ReconcileSummary> {
        debug!("running state reconciliation");

        let clusters = self
            .provisioner
            .list_clusters()
            .await
            .context("failed to list clusters")?;
        let clusters: HashMap<String, ClusterInfo> = clusters
            .into_iter()
            .filter(|c| c.name.starts_with(&self.cfg.cluster_prefix))
            .map(|c| (c.name.clone(), c))
            .collect();

        let nodes = self
            .registry
            .list_live_nodes()
            .await
            .context("failed to list live nodes")?;
        let nodes: HashMap<String, Node> = nodes
            .into_iter()
            .map(|n| (n.cluster_name.clone(), n))
            .collect();

        let mut summary = ReconcileSummary::default();
        summary.orphans_terminated = self.detect_orphans(&clusters, &nodes).await;
        summary.ghosts_marked = self.detect_ghosts(&clusters, &nodes).await;
        summary.statuses_synced = self.sync_status(&clusters, &nodes).await;
        Ok(summary)
    }

    /// Clusters the provisioning service reports that have no live
    /// local record. They burn money and serve nothing.
    async fn detect_orphans(
        &self,
        clusters: &HashMap<String, ClusterInfo>,
        nodes: &HashMap<String, Node>,
    ) -> u32 {
        let mut terminated = 0;
        for (name, cluster) in clusters {
            if nodes.contains_key(name) {
                continue;
            }

            warn!(
                cluster_name = %name,
                status = %cluster.status,
                region = %cluster.region,
                "found orphan cluster"
            );

            if !self.cfg.auto_terminate_orphans {
                continue;
            }

            // The provisioning service rarely reports launch time, so
            // the grace check usually cannot hold an orphan back.
            if self.cfg.orphan_grace_ms > 0 {
                if let Some(launched_at) = cluster.launched_at_ms {
                    if now_ms().saturating_sub(launched_at) < self.cfg.orphan_grace_ms {
                        info!(cluster_name = %name, "orphan within grace period, skipping");
                        continue;
                    }
                }
            }

            info!(cluster_name = %name, "terminating orphan cluster to stop cost leakage");
            match self.provisioner.terminate(name).await {
                Ok(_) | Err(ProvisionError::NotFound) => {
                    info!(cluster_name = %name, "terminated orphan cluster");
                    terminated += 1;
                }
                Err(e) => {
                    error!(cluster_name = %name, error = %e, "failed to terminate orphan cluster");
                }
            }
        }
        terminated
    }

    /// Local rows that claim a live cluster the provisioning service no
    /// longer knows. Marked dead; the monitor gets an unhealthy
    /// `cloud_api` signal so its own view catches up.
    async fn detect_ghosts(
        &self,
        clusters: &HashMap<String, ClusterInfo>,
        nodes: &HashMap<String, Node>,
    ) -> u32 {
        let mut marked = 0;
        for (name, node) in nodes {
            if clusters.contains_key(name) {
                continue;
            }
            if !matches!(
                node.status,
                NodeState::Active | NodeState::Provisioning | NodeState::Suspect | NodeState::Degraded
            ) {
                continue;
            }

            warn!(cluster_name = %name, db_status = %node.status, "found ghost cluster");

            if let Err(e) = self
                .registry
                .update_node_status_by_cluster(
                    name,
                    NodeState::Dead,
                    Some("cluster missing from provisioning service"),
                )
                .await
            {
                error!(cluster_name = %name, error = %e, "failed to mark ghost node dead");
                continue;
            }
            marked += 1;

            self.monitor.store_signal(
                &node.id,
                HealthSignal {
                    healthy: false,
                    at_ms: now_ms(),
                    source: SignalSource::CloudApi,
                    message: "cluster_not_found_by_reconciler".to_string(),
                },
            );
            self.monitor.evaluate_node_health(&node.id).await;
        }
        marked
    }

    /// Nodes present on both sides: map the external status to ours and
    /// write it only when it differs and is not unknown. The `cloud_api`
    /// signal is emitted regardless, so the monitor stays current even
    /// without a status write.
    async fn sync_status(
        &self,
        clusters: &HashMap<String, ClusterInfo>,
        nodes: &HashMap<String, Node>,
    ) -> u32 {
        let mut synced = 0;
        for (name, node) in nodes {
            let Some(cluster) = clusters.get(name) else {
                continue;
            };

            let (mapped, healthy) = map_external_status(&cluster.status);

            self.monitor.store_signal(
                &node.id,
                HealthSignal {
                    healthy,
                    at_ms: now_ms(),
                    source: SignalSource::CloudApi,
                    message: format!("cloud_status={}", cluster.status),
                },
            );
            self.monitor.evaluate_node_health(&node.id).await;

            if mapped != node.status && mapped != NodeState::Unknown {
                info!(
                    cluster_name = %name,
                    old_status = %node.status,
                    new_status = %mapped,
                    "syncing node status"
                );
                if let Err(e) = self
                    .registry
                    .update_node_status_by_cluster(name, mapped, None)
                    .await
                {
                    error!(cluster_name = %name, error = %e, "failed to sync node status");
                    continue;
                }
                synced += 1;
            }
        }
        synced
    }
}

/// Map the provisioning service's status vocabulary onto ours. Unknown
/// strings stay `Unknown` rather than guessing; a wrong status is worse
/// than a stale one. The bool is the `cloud_api` health verdict:
/// provisioning counts as healthy.
pub fn map_external_status(status: &str) -> (NodeState, bool) {
    match status.to_uppercase().as_str() {
        "UP" => (NodeState::Active, true),
        "INIT" | "PROVISIONING" => (NodeState::Provisioning, true),
        "STOPPED" | "AUTOSTOPPED" => (NodeState::Stopped, false),
        _ => (NodeState::Unknown, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::monitor::MonitorConfig;
    use stratus_provision::SimProvisioner;
    use stratus_registry::MemoryRegistry;

    fn make_node(id: &str, cluster: &str, status: NodeState) -> Node {
        Node {
            id: id.to_string(),
            deployment_id: None,
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

    fn healthy_signal(source: SignalSource) -> HealthSignal {
        HealthSignal {
            healthy: true,
            at_ms: now_ms(),
            source,
            message: "test".to_string(),
        }
    }

    fn setup() -> (StateReconciler, MemoryRegistry, SimProvisioner, Arc<TripleSafetyMonitor>) {
        let registry = MemoryRegistry::new();
        let provisioner = SimProvisioner::new();
        let monitor = TripleSafetyMonitor::new(
            Arc::new(registry.clone()),
            Arc::new(provisioner.clone()),
            Arc::new(EventBus::new()),
            MonitorConfig::default(),
        );
        let reconciler = StateReconciler::new(
            Arc::new(registry.clone()),
            Arc::new(provisioner.clone()),
            monitor.clone(),
            ReconcilerConfig::default(),
        );
        (reconciler, registry, provisioner, monitor)
    }

    #[tokio::test]
    async fn test_orphan_is_terminated_exactly_once() {
        let (reconciler, _, provisioner, _) = setup();
        provisioner.seed_cluster("stratus-x", "UP", "us-east-1").await;

        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.orphans_terminated, 1);
        assert_eq!(provisioner.terminated().await, vec!["stratus-x".to_string()]);

        // The cluster is gone now; a second pass reports nothing.
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.orphans_terminated, 0);
        assert_eq!(provisioner.terminated().await.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_clusters_are_ignored() {
        let (reconciler, _, provisioner, _) = setup();
        provisioner.seed_cluster("someone-elses", "UP", "us-east-1").await;

        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.orphans_terminated, 0);
        assert!(provisioner.terminated().await.is_empty());
    }

    #[tokio::test]
    async fn test_ghost_is_marked_dead_with_one_signal() {
        let (reconciler, registry, _, monitor) = setup();
        registry
            .create_node(make_node("n1", "stratus-y", NodeState::Active))
            .await
            .unwrap();

        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.ghosts_marked, 1);

        let node = registry.get_node("n1").await.unwrap().unwrap();
        assert_eq!(node.status, NodeState::Dead);

        let signals = monitor.signals_for("n1").unwrap();
        let cloud = signals.get(&SignalSource::CloudApi).unwrap();
        assert!(!cloud.healthy);

        // Dead is terminal, so the next pass sees no ghost candidates.
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.ghosts_marked, 0);
    }

    #[tokio::test]
    async fn test_status_sync_writes_only_on_difference() {
        let (reconciler, registry, provisioner, _) = setup();
        registry
            .create_node(make_node("n1", "stratus-z", NodeState::Provisioning))
            .await
            .unwrap();
        provisioner.seed_cluster("stratus-z", "UP", "us-east-1").await;

        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.statuses_synced, 1);
        let node = registry.get_node("n1").await.unwrap().unwrap();
        assert_eq!(node.status, NodeState::Active);
    }

    #[tokio::test]
    async fn test_unknown_external_status_is_not_written() {
        let (reconciler, registry, provisioner, _) = setup();
        registry
            .create_node(make_node("n1", "stratus-z", NodeState::Active))
            .await
            .unwrap();
        provisioner
            .seed_cluster("stratus-z", "SOMETHING_NEW", "us-east-1")
            .await;

        // Pre-seed healthy data-plane signals so the monitor's fusion
        // does not flip the status either.
        let monitor = &reconciler.monitor;
        monitor.store_signal("n1", healthy_signal(SignalSource::Heartbeat));
        monitor.store_signal("n1", healthy_signal(SignalSource::Poll));

        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.statuses_synced, 0);
        let node = registry.get_node("n1").await.unwrap().unwrap();
        // Unknown is never guessed into the registry; fusion downgraded
        // the node to suspect because the cloud signal is unhealthy.
        assert_eq!(node.status, NodeState::Suspect);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (reconciler, registry, provisioner, monitor) = setup();
        registry
            .create_node(make_node("n1", "stratus-a", NodeState::Active))
            .await
            .unwrap();
        provisioner.seed_cluster("stratus-a", "UP", "us-east-1").await;

        // Healthy data-plane signals, so fusion agrees with the stored
        // status and performs no writes of its own.
        monitor.store_signal("n1", healthy_signal(SignalSource::Heartbeat));
        monitor.store_signal("n1", healthy_signal(SignalSource::Poll));

        let first = reconciler.reconcile_once().await.unwrap();
        assert_eq!(first, ReconcileSummary::default());

        let before = registry.mutations().await;
        let second = reconciler.reconcile_once().await.unwrap();
        assert_eq!(second, ReconcileSummary::default());
        assert_eq!(registry.mutations().await, before);
    }
}
