use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("{0}")]
    Other(String),
}
