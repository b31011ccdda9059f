use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, default_value = "0.0.0.0:8700")]
    pub listen: String,

    /// Provisioning service base URL. Unset means the in-memory
    /// simulator backs the control plane (dev mode).
    #[arg(long, env = "STRATUS_PROVISIONER_URL")]
    pub provisioner_url: Option<String>,

    /// Bearer token for the provisioning service.
    #[arg(long, env = "STRATUS_PROVISIONER_TOKEN")]
    pub provisioner_token: Option<String>,

    /// Active liveness poll cadence, seconds.
    #[arg(long, default_value_t = 60)]
    pub poll_interval_secs: u64,

    /// Cloud verification cadence, seconds. The most expensive signal,
    /// so the least frequent.
    #[arg(long, default_value_t = 300)]
    pub cloud_check_interval_secs: u64,

    /// State reconciliation cadence, seconds.
    #[arg(long, default_value_t = 60)]
    pub reconcile_interval_secs: u64,

    /// Deployment reconciliation cadence, seconds.
    #[arg(long, default_value_t = 30)]
    pub deploy_interval_secs: u64,

    /// Predictive cache-warm cadence, seconds.
    #[arg(long, default_value_t = 1800)]
    pub warm_interval_secs: u64,

    /// Terminate clusters that exist in the cloud with no local record.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_terminate_orphans: bool,

    /// Name prefix for clusters this fleet owns.
    #[arg(long, default_value = "stratus-")]
    pub cluster_prefix: String,

    /// OTLP collector base URL for trace export.
    #[arg(long, env = "STRATUS_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP collector.
    #[arg(long, env = "STRATUS_OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
