use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use stratus_common::{
    now_ms, Deployment, Event, EventType, LaunchPhase, Node, NodeState, ScalingStrategy,
};
use stratus_provision::{LaunchSpec, ProvisionError, Provisioner, RequestStatus};
use stratus_registry::Registry;

use crate::advisor::HardwareAdvisor;
use crate::bus::EventBus;
use crate::node_logs::NodeLogStore;
use crate::warmer::ModelCacheWarmer;

/// Observed latency per model, answered by the request-routing layer.
/// Declared here (not in a routing crate) so the controller has no
/// dependency on it.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn average_latency_ms(&self, model_name: &str) -> anyhow::Result<f64>;
}

/// Probe for wiring without a load balancer attached: reports zero, so
/// latency never triggers a scale-up.
pub struct NullLatencyProbe;

#[async_trait]
impl LatencyProbe for NullLatencyProbe {
    async fn average_latency_ms(&self, _model_name: &str) -> anyhow::Result<f64> {
        Ok(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub interval: Duration,
    /// Average latency above this launches one extra node.
    pub latency_threshold_ms: f64,
    /// Deadline for one launch (provision + request wait).
    pub launch_timeout: Duration,
    /// Deadline for one termination.
    pub terminate_timeout: Duration,
    /// Poll cadence while waiting on an async provisioning request.
    pub request_poll_interval: Duration,
    pub cluster_prefix: String,
    /// Prefer spot capacity for controller-launched nodes.
    pub use_spot: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            latency_threshold_ms: 200.0,
            launch_timeout: Duration::from_secs(600),
            terminate_timeout: Duration::from_secs(300),
            request_poll_interval: Duration::from_secs(5),
            cluster_prefix: "stratus-".to_string(),
            use_spot: true,
        }
    }
}

/// Keeps every deployment's live replica count inside
/// [min_replicas, max_replicas] and reacts to observed latency.
///
/// Scale-down on low latency is deliberately absent: removing capacity
/// is riskier than adding it, so it takes operator action or the
/// max-replica ceiling.
pub struct DeploymentController {
    registry: Arc<dyn Registry>,
    provisioner: Arc<dyn Provisioner>,
    probe: Arc<dyn LatencyProbe>,
    advisor: Arc<dyn HardwareAdvisor>,
    bus: Arc<EventBus>,
    logs: Arc<NodeLogStore>,
    warmer: Arc<ModelCacheWarmer>,
    cfg: ControllerConfig,
}

impl DeploymentController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn Registry>,
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn LatencyProbe>,
        advisor: Arc<dyn HardwareAdvisor>,
        bus: Arc<EventBus>,
        logs: Arc<NodeLogStore>,
        warmer: Arc<ModelCacheWarmer>,
        cfg: ControllerConfig,
    ) -> Self {
        Self {
            registry,
            provisioner,
            probe,
            advisor,
            bus,
            logs,
            warmer,
            cfg,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    /// One tick: reconcile every deployment concurrently. A slow
    /// provisioning call in one deployment never stalls the others; the
    /// pass still waits for all of them, bounded by the per-operation
    /// deadlines.
    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        let deployments = self
            .registry
            .list_deployments()
            .await
            .context("failed to list deployments")?;

        let passes = deployments.into_iter().map(|d| async move {
            let name = d.name.clone();
            if let Err(e) = self.reconcile_deployment(d).await {
                error!(deployment = %name, error = %e, "failed to reconcile deployment");
            }
        });
        join_all(passes).await;
        Ok(())
    }

    async fn reconcile_deployment(&self, d: Deployment) -> anyhow::Result<()> {
        let active = self.registry.count_deployment_nodes(&d.id).await?;

        debug!(
            deployment = %d.name,
            active,
            min = d.min_replicas,
            max = d.max_replicas,
            "reconciling deployment"
        );

        // The cached count is corrected, never trusted. Failure here is
        // secondary bookkeeping, not a reason to abort.
        if active != d.current_replicas {
            if let Err(e) = self.registry.set_current_replicas(&d.id, active).await {
                warn!(deployment = %d.name, error = %e, "failed to update current replicas");
            }
        }

        if active < d.min_replicas {
            let needed = d.min_replicas - active;
            info!(deployment = %d.name, needed, "scaling up deployment");
            self.scale_up(&d, needed).await;
            return Ok(());
        }

        if active > d.max_replicas {
            let excess = active - d.max_replicas;
            info!(deployment = %d.name, excess, "scaling down deployment");
            self.scale_down(&d, excess).await?;
            return Ok(());
        }

        if let Err(e) = self.check_scaling_metrics(&d, active).await {
            error!(deployment = %d.name, error = %e, "failed to check scaling metrics");
        }

        Ok(())
    }

    /// Latency-driven scale-up: one node at a time, never past max.
    async fn check_scaling_metrics(&self, d: &Deployment, active: u32) -> anyhow::Result<()> {
        if active >= d.max_replicas || d.strategy == ScalingStrategy::Fixed {
            return Ok(());
        }

        let avg_latency_ms = self.probe.average_latency_ms(&d.model_name).await?;
        if avg_latency_ms > self.cfg.latency_threshold_ms {
            info!(
                deployment = %d.name,
                avg_latency_ms,
                "high latency detected, scaling up"
            );
            self.scale_up(d, 1).await;
        }

        Ok(())
    }

    async fn scale_up(&self, d: &Deployment, count: u32) {
        let (gpu_type, gpu_count) = if d.gpu_type.is_empty() || d.gpu_type == "auto" {
            self.advisor.optimal_config(&d.model_name)
        } else {
            (d.gpu_type.clone(), 1)
        };

        let launches = (0..count).map(|_| {
            let gpu_type = gpu_type.clone();
            async move {
                if let Err(e) = self.launch_one(d, &gpu_type, gpu_count).await {
                    error!(deployment = %d.name, error = %e, "failed to launch scaled node");
                }
            }
        });
        join_all(launches).await;
    }

    /// Launch one node end to end: registry row first (so the
    /// reconciler never sees the new cluster as an orphan), then the
    /// provisioning request, then the request wait, all under one
    /// deadline. No inline retry; the next tick recomputes demand.
    async fn launch_one(
        &self,
        d: &Deployment,
        gpu_type: &str,
        gpu_count: u32,
    ) -> anyhow::Result<()> {
        let node_id = Uuid::new_v4().to_string();
        let cluster_name = format!(
            "{}{}",
            self.cfg.cluster_prefix,
            &node_id[..8.min(node_id.len())]
        );

        let node = Node {
            id: node_id.clone(),
            deployment_id: Some(d.id.clone()),
            model_name: d.model_name.clone(),
            provider: d.provider.clone(),
            region: d.region.clone(),
            gpu_type: gpu_type.to_string(),
            gpu_count,
            cluster_name: cluster_name.clone(),
            status: NodeState::Provisioning,
            status_message: String::new(),
            health_score: 0.0,
            endpoint: None,
            last_heartbeat_ms: 0,
            created_at_ms: now_ms(),
            launch_request_id: None,
        };
        self.registry.create_node(node).await?;

        self.logs
            .log_info(&node_id, LaunchPhase::Queued, "launch request queued", 5);

        let spec = LaunchSpec {
            node_id: node_id.clone(),
            cluster_name: cluster_name.clone(),
            provider: d.provider.clone(),
            region: d.region.clone(),
            gpu_type: gpu_type.to_string(),
            gpu_count,
            model_name: d.model_name.clone(),
            use_spot: self.cfg.use_spot,
            deployment_id: Some(d.id.clone()),
        };

        let launched = tokio::time::timeout(self.cfg.launch_timeout, async {
            let request_id = self.provisioner.launch(&spec).await?;
            self.logs.log_info(
                &node_id,
                LaunchPhase::Provisioning,
                &format!("provisioning {gpu_count}x{gpu_type} in {}", d.region),
                15,
            );
            if let Err(e) = self
                .registry
                .set_launch_request(&node_id, Some(&request_id))
                .await
            {
                warn!(node_id = %node_id, error = %e, "failed to record launch request id");
            }
            self.provisioner
                .wait_for_request(&request_id, self.cfg.request_poll_interval)
                .await
        })
        .await;

        match launched {
            Ok(Ok(RequestStatus::Succeeded)) => {
                let _ = self.registry.set_launch_request(&node_id, None).await;
                self.registry
                    .update_node_status(&node_id, NodeState::Active, Some("launch complete"))
                    .await?;
                self.logs
                    .log_info(&node_id, LaunchPhase::Active, "node launched", 100);

                self.bus.publish(Event::new(
                    EventType::NodeLaunched,
                    None,
                    serde_json::json!({
                        "node_id": &node_id,
                        "cluster_name": &cluster_name,
                        "deployment_id": &d.id,
                        "model_name": &d.model_name,
                    }),
                ));

                // Warm-on-launch trigger: runs detached, the warmer
                // waits out its own grace period first.
                let warmer = self.warmer.clone();
                let model = d.model_name.clone();
                tokio::spawn(async move {
                    if let Err(e) = warmer.warm_on_launch(&cluster_name, &model).await {
                        warn!(cluster = %cluster_name, error = %e, "warm-on-launch failed");
                    }
                });
                Ok(())
            }
            Ok(Ok(RequestStatus::Failed(reason))) => {
                self.fail_launch(&node_id, &reason).await;
                Err(anyhow::anyhow!("launch request failed: {reason}"))
            }
            Ok(Err(e)) => {
                self.fail_launch(&node_id, &e.to_string()).await;
                Err(e.into())
            }
            Err(_) => {
                self.fail_launch(&node_id, "launch deadline exceeded").await;
                Err(anyhow::anyhow!("launch deadline exceeded"))
            }
        }
    }

    async fn fail_launch(&self, node_id: &str, reason: &str) {
        if let Err(e) = self
            .registry
            .update_node_status(node_id, NodeState::Failed, Some(reason))
            .await
        {
            error!(node_id, error = %e, "failed to mark node failed");
        }
        let _ = self.registry.set_launch_request(node_id, None).await;
        self.logs
            .log_error(node_id, LaunchPhase::Failed, "launch failed", reason);
    }

    /// Terminate the oldest nodes first: long-running instances carry
    /// the most spot-preemption exposure, so attrition starts there.
    async fn scale_down(&self, d: &Deployment, count: u32) -> anyhow::Result<()> {
        let victims = self
            .registry
            .oldest_active_nodes(&d.id, count as usize)
            .await?;

        let terminations = victims.into_iter().map(|node| async move {
            if let Err(e) = self.terminate_one(&node).await {
                error!(cluster = %node.cluster_name, error = %e, "failed to terminate scaled node");
            }
        });
        join_all(terminations).await;
        Ok(())
    }

    async fn terminate_one(&self, node: &Node) -> anyhow::Result<()> {
        let result = tokio::time::timeout(
            self.cfg.terminate_timeout,
            self.provisioner.terminate(&node.cluster_name),
        )
        .await;

        match result {
            Ok(Ok(request_id)) => {
                let _ = self
                    .registry
                    .set_launch_request(&node.id, Some(&request_id))
                    .await;
                // Best effort: the cluster is going away either way.
                if let Err(e) = tokio::time::timeout(
                    self.cfg.terminate_timeout,
                    self.provisioner
                        .wait_for_request(&request_id, self.cfg.request_poll_interval),
                )
                .await
                .unwrap_or(Err(ProvisionError::Timeout))
                {
                    warn!(cluster = %node.cluster_name, error = %e, "terminate request did not confirm");
                }
                self.mark_terminated(node, "terminated by deployment controller")
                    .await
            }
            // Already gone: the desired end state is true.
            Ok(Err(ProvisionError::NotFound)) => {
                self.mark_terminated(node, "cluster already absent").await
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(anyhow::anyhow!("terminate deadline exceeded")),
        }
    }

    async fn mark_terminated(&self, node: &Node, message: &str) -> anyhow::Result<()> {
        self.registry
            .update_node_status(&node.id, NodeState::Terminated, Some(message))
            .await?;
        let _ = self.registry.set_launch_request(&node.id, None).await;

        self.bus.publish(Event::new(
            EventType::NodeTerminated,
            None,
            serde_json::json!({
                "node_id": &node.id,
                "cluster_name": &node.cluster_name,
                "deployment_id": &node.deployment_id,
            }),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::SizeClassAdvisor;
    use crate::warmer::WarmerConfig;
    use stratus_provision::SimProvisioner;
    use stratus_registry::MemoryRegistry;

    struct StaticProbe(f64);

    #[async_trait]
    impl LatencyProbe for StaticProbe {
        async fn average_latency_ms(&self, _model_name: &str) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    fn make_deployment(min: u32, max: u32, current: u32) -> Deployment {
        Deployment {
            id: "dep-1".to_string(),
            name: "qwen-prod".to_string(),
            model_name: "qwen2.5-7b".to_string(),
            min_replicas: min,
            max_replicas: max,
            current_replicas: current,
            strategy: ScalingStrategy::Latency,
            provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            gpu_type: "A10G".to_string(),
        }
    }

    fn make_node(id: &str, cluster: &str, created_at_ms: u64) -> Node {
        Node {
            id: id.to_string(),
            deployment_id: Some("dep-1".to_string()),
            model_name: "qwen2.5-7b".to_string(),
            provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            gpu_type: "A10G".to_string(),
            gpu_count: 1,
            cluster_name: cluster.to_string(),
            status: NodeState::Active,
            status_message: String::new(),
            health_score: 1.0,
            endpoint: None,
            last_heartbeat_ms: 0,
            created_at_ms,
            launch_request_id: None,
        }
    }

    fn make_controller(
        registry: &MemoryRegistry,
        provisioner: &SimProvisioner,
        latency_ms: f64,
    ) -> DeploymentController {
        let registry: Arc<dyn Registry> = Arc::new(registry.clone());
        let provisioner_arc: Arc<dyn Provisioner> = Arc::new(provisioner.clone());
        let warmer = ModelCacheWarmer::new(
            registry.clone(),
            provisioner_arc.clone(),
            WarmerConfig {
                auto_warm_on_launch: false,
                ..WarmerConfig::default()
            },
        );
        DeploymentController::new(
            registry,
            provisioner_arc,
            Arc::new(StaticProbe(latency_ms)),
            Arc::new(SizeClassAdvisor),
            Arc::new(EventBus::new()),
            Arc::new(NodeLogStore::new()),
            warmer,
            ControllerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_scale_up_to_min_replicas() {
        let registry = MemoryRegistry::new();
        let provisioner = SimProvisioner::new();
        registry
            .upsert_deployment(make_deployment(2, 5, 1))
            .await
            .unwrap();

        let controller = make_controller(&registry, &provisioner, 0.0);
        controller.reconcile_once().await.unwrap();

        let launched = provisioner.launched().await;
        assert_eq!(launched.len(), 2);
        assert!(launched.iter().all(|s| s.deployment_id.as_deref() == Some("dep-1")));

        // Both rows exist and finished the launch path.
        assert_eq!(registry.count_deployment_nodes("dep-1").await.unwrap(), 2);
        // The cached replica count was corrected to the observed 0.
        let dep = registry.get_deployment("dep-1").await.unwrap().unwrap();
        assert_eq!(dep.current_replicas, 0);
    }

    #[tokio::test]
    async fn test_scale_down_terminates_oldest_first() {
        let registry = MemoryRegistry::new();
        let provisioner = SimProvisioner::new();
        registry
            .upsert_deployment(make_deployment(1, 5, 6))
            .await
            .unwrap();

        for i in 0..6u64 {
            let cluster = format!("stratus-n{i}");
            registry
                .create_node(make_node(&format!("n{i}"), &cluster, 1000 + i * 100))
                .await
                .unwrap();
            provisioner.seed_cluster(&cluster, "UP", "us-east-1").await;
        }

        let controller = make_controller(&registry, &provisioner, 0.0);
        controller.reconcile_once().await.unwrap();

        // Exactly one termination, and it picked the oldest node.
        assert_eq!(provisioner.terminated().await, vec!["stratus-n0".to_string()]);
        let node = registry.get_node("n0").await.unwrap().unwrap();
        assert_eq!(node.status, NodeState::Terminated);
    }

    #[tokio::test]
    async fn test_high_latency_launches_exactly_one() {
        let registry = MemoryRegistry::new();
        let provisioner = SimProvisioner::new();
        registry
            .upsert_deployment(make_deployment(1, 3, 2))
            .await
            .unwrap();
        for i in 0..2u64 {
            registry
                .create_node(make_node(&format!("n{i}"), &format!("stratus-n{i}"), 1000))
                .await
                .unwrap();
        }

        let controller = make_controller(&registry, &provisioner, 250.0);
        controller.reconcile_once().await.unwrap();
        assert_eq!(provisioner.launched().await.len(), 1);
    }

    #[tokio::test]
    async fn test_low_latency_does_not_scale() {
        let registry = MemoryRegistry::new();
        let provisioner = SimProvisioner::new();
        registry
            .upsert_deployment(make_deployment(1, 3, 2))
            .await
            .unwrap();
        for i in 0..2u64 {
            registry
                .create_node(make_node(&format!("n{i}"), &format!("stratus-n{i}"), 1000))
                .await
                .unwrap();
        }

        let controller = make_controller(&registry, &provisioner, 50.0);
        controller.reconcile_once().await.unwrap();
        assert!(provisioner.launched().await.is_empty());
    }

    #[tokio::test]
    async fn test_auto_gpu_type_resolves_through_advisor() {
        let registry = MemoryRegistry::new();
        let provisioner = SimProvisioner::new();
        let mut dep = make_deployment(1, 2, 0);
        dep.model_name = "meta-llama/Llama-3-70b-instruct".to_string();
        dep.gpu_type = "auto".to_string();
        registry.upsert_deployment(dep).await.unwrap();

        let controller = make_controller(&registry, &provisioner, 0.0);
        controller.reconcile_once().await.unwrap();

        let launched = provisioner.launched().await;
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].gpu_type, "H100");
        assert_eq!(launched[0].gpu_count, 4);
    }
}
