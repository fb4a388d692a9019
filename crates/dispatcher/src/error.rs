use thiserror::Error;

/// Errors from the per-agent dispatcher (spec §4.H).
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("transport error: {0}")]
    Transport(#[from] kairos_transport::TransportError),
}
