use thiserror::Error;

/// Errors from controller startup/teardown (spec §4.J).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("transport error: {0}")]
    Transport(#[from] kairos_transport::TransportError),
    #[error("failed to bind balancer listener: {0}")]
    Io(#[from] std::io::Error),
}
