use thiserror::Error;

pub type Result<T> = std::result::Result<T, DrydockError>;

#[derive(Error, Debug)]
pub enum DrydockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Auth negotiation failed: {0}")]
    Auth(String),

    #[error("Registry denied manifest request with status {status}")]
    DigestFetch { status: u16 },

    #[error("Rebuild failed: {0}")]
    RebuildFailed(String),

    #[error("Update snapshot changed since the trigger was issued")]
    StaleSnapshot,
}

impl From<bollard::errors::Error> for DrydockError {
    fn from(err: bollard::errors::Error) -> Self {
        DrydockError::Runtime(err.to_string())
    }
}
