use thiserror::Error;

/// Errors from the balancer (spec §4.D–§4.G).
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("token counter error: {0}")]
    Token(#[from] kairos_tokens::TokenError),
    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
    #[error("no backend configured for model '{0}'")]
    NoBackendForModel(String),
    #[error("agent '{0}' has no configured model")]
    AgentNotConfigured(String),
    #[error("dispatch channel closed before placement was assigned")]
    DispatchChannelClosed,
}
