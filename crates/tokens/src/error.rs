use thiserror::Error;

/// Errors from the token counter (spec §4.C).
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("agent '{0}' has no configured model")]
    AgentNotConfigured(String),
    #[error("failed to load tokenizer for model '{model}': {source}")]
    TokenizerUnavailable {
        model: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write token log: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write csv record: {0}")]
    Csv(#[from] csv::Error),
}
