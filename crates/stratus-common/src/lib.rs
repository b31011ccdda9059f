pub mod deployment;
pub mod error;
pub mod event;
pub mod health;
pub mod node;
pub mod node_log;
pub mod time;

pub use deployment::{Deployment, ScalingStrategy};
pub use error::FleetError;
pub use event::{Event, EventType};
pub use health::{HealthSignal, SignalSource};
pub use node::{Node, NodeState};
pub use node_log::{LaunchPhase, NodeLogEntry, NodeLogLevel};
pub use time::now_ms;

pub mod telemetry;
