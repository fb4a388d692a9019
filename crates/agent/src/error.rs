use thiserror::Error;

/// Errors from the agent base (spec §4.I).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent logic failed: {0}")]
    RunFailed(String),
    #[error("balancer request failed: {0}")]
    Http(#[from] reqwest::Error),
}
