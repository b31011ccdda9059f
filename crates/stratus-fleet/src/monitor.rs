use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tracing::{error, info, warn};

use stratus_common::{
    now_ms, Event, EventType, FleetError, HealthSignal, NodeState, SignalSource,
};
use stratus_provision::Provisioner;
use stratus_registry::Registry;

use crate::bus::EventBus;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// A heartbeat older than this no longer counts as healthy.
    pub heartbeat_timeout: Duration,
    /// Cadence of the active poll loop (layer 2).
    pub poll_interval: Duration,
    /// Cadence of cloud verification (layer 3). The most expensive
    /// signal, so the least frequent.
    pub cloud_check_interval: Duration,
    /// Per-node liveness probe timeout.
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60),
            cloud_check_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Fuses three independently-arriving health signals per node
/// (agent heartbeat push, active poll, cloud verification) into one
/// verdict, and writes the resulting status transitions.
///
/// The fusion is deliberately asymmetric: a false "dead" destroys a
/// running node and its in-flight requests, a false "healthy" only
/// delays detection by one cycle.
pub struct TripleSafetyMonitor {
    registry: Arc<dyn Registry>,
    provisioner: Arc<dyn Provisioner>,
    bus: Arc<EventBus>,
    http: reqwest::Client,
    cfg: MonitorConfig,

    /// node_id -> source -> latest signal. Last writer wins per
    /// (node, source); no cross-field atomicity needed since each
    /// source updates independently.
    signals: DashMap<String, HashMap<SignalSource, HealthSignal>>,
}

impl TripleSafetyMonitor {
    pub fn new(
        registry: Arc<dyn Registry>,
        provisioner: Arc<dyn Provisioner>,
        bus: Arc<EventBus>,
        cfg: MonitorConfig,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.probe_timeout)
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            registry,
            provisioner,
            bus,
            http,
            cfg,
            signals: DashMap::new(),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.cfg
    }

    /// Layer 1: heartbeat pushed by the node's own agent.
    /// Unconditionally reactivates the node and refreshes its score.
    pub async fn record_heartbeat(
        &self,
        node_id: &str,
        health_score: f64,
    ) -> Result<(), FleetError> {
        let updated = self
            .registry
            .record_heartbeat(node_id, health_score, now_ms())
            .await
            .map_err(FleetError::Other)?;
        if !updated {
            return Err(FleetError::NodeNotFound(node_id.to_string()));
        }

        self.store_signal(
            node_id,
            HealthSignal {
                healthy: health_score > 0.5,
                at_ms: now_ms(),
                source: SignalSource::Heartbeat,
                message: format!("health_score={health_score:.2}"),
            },
        );

        self.evaluate_node_health(node_id).await;
        Ok(())
    }

    /// Record one source's latest opinion. Last writer wins.
    pub fn store_signal(&self, node_id: &str, signal: HealthSignal) {
        self.signals
            .entry(node_id.to_string())
            .or_default()
            .insert(signal.source, signal);
    }

    pub fn signals_for(&self, node_id: &str) -> Option<HashMap<SignalSource, HealthSignal>> {
        self.signals.get(node_id).map(|s| s.value().clone())
    }

    /// Layer 2: one poll pass. Probes every active/suspect node's
    /// advertised endpoint concurrently; a failing probe marks the node
    /// suspect, never dead.
    pub async fn poll_pass(&self) {
        let nodes = match self
            .registry
            .list_nodes_in_states(&[NodeState::Active, NodeState::Suspect])
            .await
        {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "failed to fetch nodes for polling");
                return;
            }
        };

        let checks = nodes
            .into_iter()
            .filter_map(|n| n.endpoint.clone().map(|ep| (n.id, ep)))
            .map(|(node_id, endpoint)| async move {
                let (healthy, message) = self.check_node_health(&endpoint).await;

                self.store_signal(
                    &node_id,
                    HealthSignal {
                        healthy,
                        at_ms: now_ms(),
                        source: SignalSource::Poll,
                        message: message.clone(),
                    },
                );

                if !healthy {
                    self.mark_suspect(&node_id, &message).await;
                }

                self.evaluate_node_health(&node_id).await;
            });

        join_all(checks).await;
    }

    async fn check_node_health(&self, endpoint: &str) -> (bool, String) {
        let health_url = format!("{}/health", endpoint.trim_end_matches('/'));
        match self.http.get(&health_url).send().await {
            Ok(resp) if resp.status().is_success() => (true, "health check passed".to_string()),
            Ok(resp) => (
                false,
                format!("health check failed: status={}", resp.status().as_u16()),
            ),
            Err(e) => (false, format!("http error: {e}")),
        }
    }

    /// Set status to suspect with a reason. Escalation to dead is only
    /// ever the fusion's decision.
    pub async fn mark_suspect(&self, node_id: &str, reason: &str) {
        warn!(node_id, reason, "marking node as suspect");
        if let Err(e) = self
            .registry
            .update_node_status(node_id, NodeState::Suspect, Some(reason))
            .await
        {
            error!(node_id, error = %e, "failed to mark node suspect");
        }
    }

    /// Layer 3: one cloud verification pass. A single cluster listing
    /// serves every node; per-node status calls would be too expensive
    /// at this cadence.
    pub async fn cloud_verify_pass(&self) {
        let clusters = match self.provisioner.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                error!(error = %e, "failed to list clusters for cloud verification");
                return;
            }
        };
        let by_name: HashMap<String, String> = clusters
            .into_iter()
            .map(|c| (c.name, c.status))
            .collect();

        let nodes = match self
            .registry
            .list_nodes_in_states(&[NodeState::Active, NodeState::Suspect])
            .await
        {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "failed to fetch nodes for cloud verification");
                return;
            }
        };

        for node in nodes {
            let (healthy, message) = match by_name.get(&node.cluster_name) {
                Some(status) => {
                    let up = matches!(
                        status.to_uppercase().as_str(),
                        "UP" | "INIT" | "PROVISIONING"
                    );
                    (up, format!("cloud_status={status}"))
                }
                None => (false, "cluster_not_listed".to_string()),
            };

            self.store_signal(
                &node.id,
                HealthSignal {
                    healthy,
                    at_ms: now_ms(),
                    source: SignalSource::CloudApi,
                    message,
                },
            );
            self.evaluate_node_health(&node.id).await;
        }
    }

    /// Fuse the current signals and write the verdict when it differs
    /// from the node's stored status.
    pub async fn evaluate_node_health(&self, node_id: &str) {
        let Some(signals) = self.signals_for(node_id) else {
            return;
        };

        let verdict = self.determine_health(&signals, now_ms());

        let node = match self.registry.get_node(node_id).await {
            Ok(Some(node)) => node,
            Ok(None) => return,
            Err(e) => {
                error!(node_id, error = %e, "failed to read node for health evaluation");
                return;
            }
        };
        if node.status == verdict {
            return;
        }

        let mut parts: Vec<String> = signals
            .values()
            .map(|s| format!("{}: {}", s.source, s.message))
            .collect();
        parts.sort();
        let status_message = format!("{} | {}", verdict, parts.join("; "));

        if let Err(e) = self
            .registry
            .update_node_status(node_id, verdict, Some(&status_message))
            .await
        {
            error!(node_id, status = %verdict, error = %e, "failed to update node status");
            return;
        }

        self.bus.publish(Event::new(
            EventType::NodeHealthChanged,
            None,
            serde_json::json!({
                "node_id": node_id,
                "status": verdict.as_str(),
                "message": status_message,
            }),
        ));
        if verdict == NodeState::Degraded {
            self.bus.publish(Event::new(
                EventType::NodeHealthDegraded,
                None,
                serde_json::json!({ "node_id": node_id }),
            ));
        }

        info!(node_id, status = %verdict, "node health status updated");
    }

    /// Truth-table fusion over the three signal sources.
    ///
    /// A signal only counts as healthy while fresh: heartbeats age out
    /// after `heartbeat_timeout`, poll and cloud signals after twice
    /// their loop interval.
    pub fn determine_health(
        &self,
        signals: &HashMap<SignalSource, HealthSignal>,
        now: u64,
    ) -> NodeState {
        let fresh_healthy = |source: SignalSource, window: Duration| -> bool {
            signals
                .get(&source)
                .map(|s| s.healthy && now.saturating_sub(s.at_ms) < window.as_millis() as u64)
                .unwrap_or(false)
        };

        let heartbeat = fresh_healthy(SignalSource::Heartbeat, self.cfg.heartbeat_timeout);
        let poll = fresh_healthy(SignalSource::Poll, 2 * self.cfg.poll_interval);
        let cloud = fresh_healthy(SignalSource::CloudApi, 2 * self.cfg.cloud_check_interval);

        // All agree healthy.
        if heartbeat && poll && cloud {
            return NodeState::Active;
        }

        // All agree unhealthy. Only here may a node be declared dead.
        if !heartbeat && !poll && !cloud {
            return NodeState::Dead;
        }

        // Cloud says the instance runs but the service does not answer:
        // likely an agent crash, worth remediation before giving up.
        if cloud && (!heartbeat || !poll) {
            return NodeState::Degraded;
        }

        // Data plane healthy but the cloud does not see the cluster:
        // suspect provisioning-service lag, recheck next cycle before
        // trusting the negative signal.
        if heartbeat && poll && !cloud {
            return NodeState::Suspect;
        }

        NodeState::Suspect
    }
}
