use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{ClusterInfo, LaunchSpec, ProvisionError, Provisioner, RequestStatus};

/// In-memory provisioning service. Launch registers the cluster as `UP`
/// immediately; terminate removes it. Tests and dev mode run against
/// this; the recorded launch/terminate/exec history is the assertion
/// surface.
#[derive(Debug, Clone)]
pub struct SimProvisioner {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    clusters: HashMap<String, ClusterInfo>,
    launched: Vec<LaunchSpec>,
    terminated: Vec<String>,
    exec_log: Vec<(String, String)>,
    fail_exec_on: HashSet<String>,
    /// Status new clusters come up in. "UP" unless a test wants to
    /// exercise the provisioning path.
    launch_status: String,
}

impl SimProvisioner {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                launch_status: "UP".to_string(),
                ..Inner::default()
            })),
        }
    }

    /// Seed a cluster as if it already existed in the cloud.
    pub async fn seed_cluster(&self, name: &str, status: &str, region: &str) {
        let mut inner = self.inner.write().await;
        inner.clusters.insert(
            name.to_string(),
            ClusterInfo {
                name: name.to_string(),
                status: status.to_string(),
                region: region.to_string(),
                head_ip: None,
                launched_at_ms: None,
            },
        );
    }

    /// Make subsequent `exec_command` calls against this cluster fail.
    pub async fn fail_exec_on(&self, cluster_name: &str) {
        let mut inner = self.inner.write().await;
        inner.fail_exec_on.insert(cluster_name.to_string());
    }

    pub async fn set_launch_status(&self, status: &str) {
        let mut inner = self.inner.write().await;
        inner.launch_status = status.to_string();
    }

    pub async fn launched(&self) -> Vec<LaunchSpec> {
        self.inner.read().await.launched.clone()
    }

    pub async fn terminated(&self) -> Vec<String> {
        self.inner.read().await.terminated.clone()
    }

    pub async fn exec_log(&self) -> Vec<(String, String)> {
        self.inner.read().await.exec_log.clone()
    }
}

impl Default for SimProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provisioner for SimProvisioner {
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, ProvisionError> {
        let mut inner = self.inner.write().await;
        let status = inner.launch_status.clone();
        inner.clusters.insert(
            spec.cluster_name.clone(),
            ClusterInfo {
                name: spec.cluster_name.clone(),
                status,
                region: spec.region.clone(),
                head_ip: None,
                launched_at_ms: Some(stratus_common::now_ms()),
            },
        );
        inner.launched.push(spec.clone());
        Ok(Uuid::new_v4().to_string())
    }

    async fn terminate(&self, cluster_name: &str) -> Result<String, ProvisionError> {
        let mut inner = self.inner.write().await;
        if inner.clusters.remove(cluster_name).is_none() {
            return Err(ProvisionError::NotFound);
        }
        inner.terminated.push(cluster_name.to_string());
        Ok(Uuid::new_v4().to_string())
    }

    async fn status(&self, cluster_name: &str) -> Result<String, ProvisionError> {
        let inner = self.inner.read().await;
        inner
            .clusters
            .get(cluster_name)
            .map(|c| c.status.clone())
            .ok_or(ProvisionError::NotFound)
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ProvisionError> {
        let inner = self.inner.read().await;
        Ok(inner.clusters.values().cloned().collect())
    }

    async fn wait_for_request(
        &self,
        _request_id: &str,
        _poll_interval: Duration,
    ) -> Result<RequestStatus, ProvisionError> {
        Ok(RequestStatus::Succeeded)
    }

    async fn exec_command(
        &self,
        cluster_name: &str,
        command: &str,
    ) -> Result<String, ProvisionError> {
        let mut inner = self.inner.write().await;
        if !inner.clusters.contains_key(cluster_name) {
            return Err(ProvisionError::NotFound);
        }
        if inner.fail_exec_on.contains(cluster_name) {
            return Err(ProvisionError::Api(format!(
                "exec failed on {cluster_name}"
            )));
        }
        inner
            .exec_log
            .push((cluster_name.to_string(), command.to_string()));
        Ok("ok".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_unknown_is_not_found() {
        let sim = SimProvisioner::new();
        match sim.terminate("nope").await {
            Err(ProvisionError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exec_is_recorded_per_cluster() {
        let sim = SimProvisioner::new();
        sim.seed_cluster("c1", "UP", "us-east-1").await;
        sim.exec_command("c1", "echo hi").await.unwrap();

        let log = sim.exec_log().await;
        assert_eq!(log, vec![("c1".to_string(), "echo hi".to_string())]);
    }
}
