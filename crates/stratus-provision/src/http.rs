use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{ClusterInfo, LaunchSpec, ProvisionError, Provisioner, RequestStatus};

/// JSON client for the provisioning service's REST API.
///
/// The service is a black box with its own retry policy; this client
/// only maps transport and HTTP status to `ProvisionError`, with 404
/// becoming the distinguished `NotFound`.
pub struct HttpProvisioner {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RequestIdResponse {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct RequestStateResponse {
    /// "pending", "running", "succeeded", "failed"
    state: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    output: String,
}

impl HttpProvisioner {
    pub fn new(base_url: String, token: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ProvisionError> {
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProvisionError::NotFound);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProvisionError::Api(format!("{status}: {body}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, ProvisionError> {
        let url = format!("{}/api/v1/clusters/launch", self.base_url);
        let resp = self.auth(self.http.post(&url)).json(spec).send().await?;
        let resp = Self::check(resp).await?;
        let body: RequestIdResponse = resp.json().await?;
        Ok(body.request_id)
    }

    async fn terminate(&self, cluster_name: &str) -> Result<String, ProvisionError> {
        let url = format!("{}/api/v1/clusters/{cluster_name}", self.base_url);
        let resp = self.auth(self.http.delete(&url)).send().await?;
        let resp = Self::check(resp).await?;
        let body: RequestIdResponse = resp.json().await?;
        Ok(body.request_id)
    }

    async fn status(&self, cluster_name: &str) -> Result<String, ProvisionError> {
        let url = format!("{}/api/v1/clusters/{cluster_name}", self.base_url);
        let resp = self.auth(self.http.get(&url)).send().await?;
        let resp = Self::check(resp).await?;
        let body: ClusterStatusResponse = resp.json().await?;
        Ok(body.status)
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ProvisionError> {
        let url = format!("{}/api/v1/clusters", self.base_url);
        let resp = self.auth(self.http.get(&url)).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn wait_for_request(
        &self,
        request_id: &str,
        poll_interval: Duration,
    ) -> Result<RequestStatus, ProvisionError> {
        let url = format!("{}/api/v1/requests/{request_id}", self.base_url);
        loop {
            let resp = self.auth(self.http.get(&url)).send().await?;
            let resp = Self::check(resp).await?;
            let body: RequestStateResponse = resp.json().await?;
            match body.state.as_str() {
                "succeeded" => return Ok(RequestStatus::Succeeded),
                "failed" => {
                    return Ok(RequestStatus::Failed(
                        body.error.unwrap_or_else(|| "unknown failure".to_string()),
                    ))
                }
                _ => tokio::time::sleep(poll_interval).await,
            }
        }
    }

    async fn exec_command(
        &self,
        cluster_name: &str,
        command: &str,
    ) -> Result<String, ProvisionError> {
        let url = format!("{}/api/v1/clusters/{cluster_name}/exec", self.base_url);
        let resp = self
            .auth(self.http.post(&url))
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let body: ExecResponse = resp.json().await?;
        Ok(body.output)
    }
}
