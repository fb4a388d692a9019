use thiserror::Error;

/// Errors from the message-handler/transport layer (spec §4.A).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("config error: {0}")]
    Config(String),
}
