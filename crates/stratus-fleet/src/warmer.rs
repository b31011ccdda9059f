use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use stratus_common::now_ms;
use stratus_provision::Provisioner;
use stratus_registry::Registry;

/// How to warm a model's cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarmStrategy {
    /// Everything under the model's mount path.
    Full,
    /// Only the most frequently opened files under a size cap.
    Partial,
    /// Warm only when the access pattern says it is worth it.
    Predictive,
}

/// Per-model access counters feeding the predictive trigger.
#[derive(Debug, Clone)]
pub struct ModelAccessPattern {
    pub model_name: String,
    pub access_count: u64,
    pub last_access_ms: u64,
    /// Exponential moving average, 0.9 history / 0.1 new sample.
    pub cache_hit_rate: f64,
    /// Same weighting, in milliseconds.
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone)]
pub struct WarmerConfig {
    /// Warm a node's cache right after it launches.
    pub auto_warm_on_launch: bool,
    /// Run the predictive loop at all.
    pub predictive_enabled: bool,
    /// Cadence of the predictive pass.
    pub warm_interval: Duration,
    /// How long a fresh node gets to initialize before the launch warm.
    pub launch_grace: Duration,
    /// Deadline for one full warm-up command.
    pub warm_timeout: Duration,
    /// Deadline for one partial warm-up command.
    pub partial_timeout: Duration,
    /// How many models the predictive pass considers per tick.
    pub top_models: usize,
    /// Access count above which a model counts as high traffic.
    pub high_access_threshold: u64,
    /// A model untouched for longer than this is not warmed predictively.
    pub recent_access_ms: u64,
    /// Hit rate below this means the cache is cold enough to warm.
    pub low_hit_rate: f64,
    /// Where model weights are mounted on the nodes.
    pub model_mount: String,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            auto_warm_on_launch: true,
            predictive_enabled: true,
            warm_interval: Duration::from_secs(30 * 60),
            launch_grace: Duration::from_secs(5),
            warm_timeout: Duration::from_secs(600),
            partial_timeout: Duration::from_secs(300),
            top_models: 10,
            high_access_threshold: 100,
            recent_access_ms: 5 * 60 * 1000,
            low_hit_rate: 0.8,
            model_mount: "/models".to_string(),
        }
    }
}

/// Pre-populates node-local model caches from origin storage, reactively
/// on launch and proactively from access patterns.
pub struct ModelCacheWarmer {
    registry: Arc<dyn Registry>,
    provisioner: Arc<dyn Provisioner>,
    cfg: WarmerConfig,

    /// model_name -> pattern. Updated from the serving path on every
    /// access, read by the predictive pass. Last writer wins per model.
    patterns: DashMap<String, ModelAccessPattern>,
}

impl ModelCacheWarmer {
    pub fn new(
        registry: Arc<dyn Registry>,
        provisioner: Arc<dyn Provisioner>,
        cfg: WarmerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            provisioner,
            cfg,
            patterns: DashMap::new(),
        })
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.cfg
    }

    /// Record one observed access. The first sample initializes the
    /// moving averages; every later one blends in at weight 0.1.
    pub fn record_model_access(&self, model_name: &str, latency_ms: f64, cache_hit: bool) {
        let hit = if cache_hit { 1.0 } else { 0.0 };
        let mut pattern = self
            .patterns
            .entry(model_name.to_string())
            .or_insert_with(|| ModelAccessPattern {
                model_name: model_name.to_string(),
                access_count: 0,
                last_access_ms: 0,
                cache_hit_rate: 0.0,
                avg_latency_ms: 0.0,
            });

        pattern.access_count += 1;
        pattern.last_access_ms = now_ms();

        if pattern.access_count == 1 {
            pattern.cache_hit_rate = hit;
            pattern.avg_latency_ms = latency_ms;
        } else {
            pattern.cache_hit_rate = pattern.cache_hit_rate * 0.9 + hit * 0.1;
            pattern.avg_latency_ms = pattern.avg_latency_ms * 0.9 + latency_ms * 0.1;
        }
    }

    pub fn access_pattern(&self, model_name: &str) -> Option<ModelAccessPattern> {
        self.patterns.get(model_name).map(|p| p.value().clone())
    }

    /// Worth warming only when the model is simultaneously high-traffic,
    /// recently accessed and poorly cached. A well-cached hot model gets
    /// no redundant warm-up.
    pub fn should_warm(&self, model_name: &str) -> bool {
        let Some(pattern) = self.patterns.get(model_name) else {
            return false;
        };

        let high_access = pattern.access_count > self.cfg.high_access_threshold;
        let recent = now_ms().saturating_sub(pattern.last_access_ms) < self.cfg.recent_access_ms;
        let cold_cache = pattern.cache_hit_rate < self.cfg.low_hit_rate;

        high_access && recent && cold_cache
    }

    /// Launch trigger: give the node a moment to come up, then warm it
    /// unconditionally.
    pub async fn warm_on_launch(&self, cluster_name: &str, model_name: &str) -> anyhow::Result<()> {
        if !self.cfg.auto_warm_on_launch {
            return Ok(());
        }

        info!(cluster = %cluster_name, model = %model_name, "auto-warming cache on node launch");
        tokio::time::sleep(self.cfg.launch_grace).await;
        self.warm_node(cluster_name, model_name, false).await
    }

    pub async fn prewarm_with_strategy(
        &self,
        model_name: &str,
        strategy: WarmStrategy,
    ) -> anyhow::Result<()> {
        match strategy {
            WarmStrategy::Full => self.prewarm(model_name).await,
            WarmStrategy::Partial => self.prewarm_partial(model_name).await,
            WarmStrategy::Predictive => {
                if self.should_warm(model_name) {
                    self.prewarm(model_name).await
                } else {
                    debug!(model = %model_name, "predictive check declined warm-up");
                    Ok(())
                }
            }
        }
    }

    /// Warm a model on every active node serving it, in parallel. One
    /// node's failure never aborts the others, but any failure makes the
    /// overall warm-up report as failed.
    pub async fn prewarm(&self, model_name: &str) -> anyhow::Result<()> {
        info!(model = %model_name, "starting model cache warming");
        self.fan_out_warm(model_name, false).await
    }

    /// Warm only the most frequently opened files, bounded in size.
    pub async fn prewarm_partial(&self, model_name: &str) -> anyhow::Result<()> {
        info!(model = %model_name, "partial cache warming");
        self.fan_out_warm(model_name, true).await
    }

    async fn fan_out_warm(&self, model_name: &str, partial: bool) -> anyhow::Result<()> {
        let nodes = self
            .registry
            .active_nodes_for_model(model_name)
            .await
            .context("failed to get nodes for model")?;

        if nodes.is_empty() {
            info!(model = %model_name, "no active nodes found for model, skipping warmup");
            return Ok(());
        }

        let total = nodes.len();
        let warms = nodes.into_iter().map(|node| {
            let cluster = node.cluster_name;
            async move {
                match self.warm_node(&cluster, model_name, partial).await {
                    Ok(()) => None,
                    Err(e) => {
                        error!(cluster = %cluster, error = %e, "failed to warm node");
                        Some(format!("node {cluster}: {e}"))
                    }
                }
            }
        });

        let errors: Vec<String> = join_all(warms).await.into_iter().flatten().collect();
        if !errors.is_empty() {
            anyhow::bail!("warmup failed on {}/{} nodes", errors.len(), total);
        }

        info!(model = %model_name, nodes_count = total, "model cache warming completed");
        Ok(())
    }

    async fn warm_node(
        &self,
        cluster_name: &str,
        model_name: &str,
        partial: bool,
    ) -> anyhow::Result<()> {
        let command = if partial {
            format!(
                "modelfs warmup --files-only --max-size 10GB {}/{}",
                self.cfg.model_mount, model_name
            )
        } else {
            format!("modelfs warmup {}/{}", self.cfg.model_mount, model_name)
        };
        let deadline = if partial {
            self.cfg.partial_timeout
        } else {
            self.cfg.warm_timeout
        };

        let output = tokio::time::timeout(
            deadline,
            self.provisioner.exec_command(cluster_name, &command),
        )
        .await
        .map_err(|_| anyhow::anyhow!("warmup deadline exceeded"))??;

        debug!(cluster = %cluster_name, output = %output, "warmup output");
        Ok(())
    }

    /// Predictive pass: rank models by recent access count, warm the
    /// ones the pattern marks as worth it.
    pub async fn predictive_pass(&self) {
        info!("running predictive cache warmup");

        let mut patterns: Vec<ModelAccessPattern> =
            self.patterns.iter().map(|p| p.value().clone()).collect();
        patterns.sort_by(|a, b| b.access_count.cmp(&a.access_count));
        patterns.truncate(self.cfg.top_models);

        for pattern in patterns {
            if !self.should_warm(&pattern.model_name) {
                continue;
            }
            info!(model = %pattern.model_name, "predictive warming for high-traffic model");
            if let Err(e) = self.prewarm(&pattern.model_name).await {
                error!(model = %pattern.model_name, error = %e, "predictive warmup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_common::{Node, NodeState};
    use stratus_provision::SimProvisioner;
    use stratus_registry::MemoryRegistry;

    fn make_node(id: &str, cluster: &str, model: &str, status: NodeState) -> Node {
        Node {
            id: id.to_string(),
            deployment_id: None,
            model_name: model.to_string(),
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

    fn setup() -> (Arc<ModelCacheWarmer>, MemoryRegistry, SimProvisioner) {
        let registry = MemoryRegistry::new();
        let provisioner = SimProvisioner::new();
        let warmer = ModelCacheWarmer::new(
            Arc::new(registry.clone()),
            Arc::new(provisioner.clone()),
            WarmerConfig::default(),
        );
        (warmer, registry, provisioner)
    }

    #[test]
    fn test_hit_rate_ema_converges_monotonically() {
        let warmer = ModelCacheWarmer::new(
            Arc::new(MemoryRegistry::new()),
            Arc::new(SimProvisioner::new()),
            WarmerConfig::default(),
        );

        let mut last = 0.0;
        for _ in 0..3 {
            warmer.record_model_access("m", 10.0, true);
            let rate = warmer.access_pattern("m").unwrap().cache_hit_rate;
            assert!(rate >= last, "hit rate regressed: {rate} < {last}");
            assert!(rate <= 1.0, "hit rate exceeded 1.0: {rate}");
            last = rate;
        }
        assert!(last > 0.99);

        // A miss pulls the average down by exactly one sample weight.
        warmer.record_model_access("m", 10.0, false);
        let rate = warmer.access_pattern("m").unwrap().cache_hit_rate;
        assert!((rate - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_should_warm_needs_all_three_conditions() {
        let (warmer, _, _) = setup();

        // 101 misses: high access, recent, cold cache.
        for _ in 0..101 {
            warmer.record_model_access("hot-cold", 50.0, false);
        }
        assert!(warmer.should_warm("hot-cold"));

        // Same traffic but a warm cache: no redundant warm-up.
        for _ in 0..500 {
            warmer.record_model_access("hot-warm", 50.0, true);
        }
        assert!(!warmer.should_warm("hot-warm"));

        // Cold cache but no traffic.
        warmer.record_model_access("quiet", 50.0, false);
        assert!(!warmer.should_warm("quiet"));

        assert!(!warmer.should_warm("never-seen"));
    }

    #[tokio::test]
    async fn test_prewarm_fans_out_to_all_active_nodes() {
        let (warmer, registry, provisioner) = setup();
        for i in 0..3 {
            let cluster = format!("stratus-c{i}");
            registry
                .create_node(make_node(
                    &format!("n{i}"),
                    &cluster,
                    "qwen2.5-7b",
                    NodeState::Active,
                ))
                .await
                .unwrap();
            provisioner.seed_cluster(&cluster, "UP", "us-east-1").await;
        }
        // A node on another model must not be touched.
        registry
            .create_node(make_node("nx", "stratus-cx", "other-model", NodeState::Active))
            .await
            .unwrap();
        provisioner.seed_cluster("stratus-cx", "UP", "us-east-1").await;

        warmer.prewarm("qwen2.5-7b").await.unwrap();

        let log = provisioner.exec_log().await;
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|(_, cmd)| cmd == "modelfs warmup /models/qwen2.5-7b"));
        assert!(log.iter().all(|(cluster, _)| cluster != "stratus-cx"));
    }

    #[tokio::test]
    async fn test_one_failing_node_fails_overall_but_not_siblings() {
        let (warmer, registry, provisioner) = setup();
        for i in 0..3 {
            let cluster = format!("stratus-c{i}");
            registry
                .create_node(make_node(
                    &format!("n{i}"),
                    &cluster,
                    "qwen2.5-7b",
                    NodeState::Active,
                ))
                .await
                .unwrap();
            provisioner.seed_cluster(&cluster, "UP", "us-east-1").await;
        }
        provisioner.fail_exec_on("stratus-c1").await;

        let err = warmer.prewarm("qwen2.5-7b").await.unwrap_err();
        assert!(err.to_string().contains("1/3"));

        // The two healthy siblings still warmed.
        assert_eq!(provisioner.exec_log().await.len(), 2);
    }

    #[tokio::test]
    async fn test_prewarm_with_no_nodes_is_ok() {
        let (warmer, _, provisioner) = setup();
        warmer.prewarm("unserved-model").await.unwrap();
        assert!(provisioner.exec_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_warm_uses_bounded_command() {
        let (warmer, registry, provisioner) = setup();
        registry
            .create_node(make_node("n1", "stratus-c1", "qwen2.5-7b", NodeState::Active))
            .await
            .unwrap();
        provisioner.seed_cluster("stratus-c1", "UP", "us-east-1").await;

        warmer.prewarm_partial("qwen2.5-7b").await.unwrap();

        let log = provisioner.exec_log().await;
        assert_eq!(log.len(), 1);
        assert!(log[0].1.contains("--files-only"));
        assert!(log[0].1.contains("--max-size 10GB"));
    }

    #[tokio::test]
    async fn test_predictive_pass_warms_only_qualifying_models() {
        let (warmer, registry, provisioner) = setup();
        registry
            .create_node(make_node("n1", "stratus-c1", "busy-model", NodeState::Active))
            .await
            .unwrap();
        provisioner.seed_cluster("stratus-c1", "UP", "us-east-1").await;

        for _ in 0..200 {
            warmer.record_model_access("busy-model", 50.0, false);
        }
        warmer.record_model_access("idle-model", 50.0, false);

        warmer.predictive_pass().await;

        let log = provisioner.exec_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "stratus-c1");
    }
}
