pub mod advisor;
pub mod bus;
pub mod controller;
pub mod monitor;
pub mod node_logs;
pub mod reconciler;
pub mod warmer;

pub use advisor::{HardwareAdvisor, SizeClassAdvisor};
pub use bus::EventBus;
pub use controller::{ControllerConfig, DeploymentController, LatencyProbe, NullLatencyProbe};
pub use monitor::{MonitorConfig, TripleSafetyMonitor};
pub use node_logs::NodeLogStore;
pub use reconciler::{ReconcilerConfig, ReconcileSummary, StateReconciler};
pub use warmer::{ModelCacheWarmer, WarmStrategy, WarmerConfig};
