pub mod http;
pub mod sim;
pub mod types;

pub use http::HttpProvisioner;
pub use sim::SimProvisioner;
pub use types::{ClusterInfo, LaunchSpec, ProvisionError, Provisioner, RequestStatus};
