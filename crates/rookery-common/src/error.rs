use thiserror::Error;

#[derive(Error, Debug)]
pub enum RookeryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected HTTP status from the registry. The message carries the
    /// status and body exactly as the failing operation formatted them.
    #[error("{0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Middleware error: {0}")]
    Middleware(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for RookeryError {
    fn from(err: serde_yaml::Error) -> Self {
        RookeryError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RookeryError>;
