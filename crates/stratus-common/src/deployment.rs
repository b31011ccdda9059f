use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStrategy {
    /// Keep replicas within [min, max], add one on high latency.
    Latency,
    /// Hold min_replicas, ignore load signals.
    Fixed,
}

impl Default for ScalingStrategy {
    fn default() -> Self {
        ScalingStrategy::Latency
    }
}

/// A named logical service backed by 0..N nodes serving one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    pub model_name: String,

    pub min_replicas: u32,
    pub max_replicas: u32,

    /// Cached count of non-terminal nodes belonging to this deployment.
    /// Corrected, never trusted, by the controller on every pass.
    #[serde(default)]
    pub current_replicas: u32,

    #[serde(default)]
    pub strategy: ScalingStrategy,

    pub provider: String,
    pub region: String,

    /// GPU type for new nodes. Empty or "auto" means the hardware
    /// advisor picks based on the model.
    #[serde(default)]
    pub gpu_type: String,
}
