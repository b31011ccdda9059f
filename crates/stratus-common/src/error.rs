/// Errors that cross component boundaries and need a distinguished
/// variant. Everything else travels as `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
