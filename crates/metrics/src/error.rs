use thiserror::Error;

/// Errors from the metrics poller (spec §4.B).
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("HTTP request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
}
