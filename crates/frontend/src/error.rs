use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontendError {
    #[error("transport error: {0}")]
    Transport(#[from] kairos_transport::TransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timestamp parse error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("config error: {0}")]
    Config(String),
}
