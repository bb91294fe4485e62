use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("host key error: {0}")]
    HostKey(String),

    #[error("ssh protocol error: {0}")]
    Ssh(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, DecoyError>;
