/// Shared error type used across all OpenClaw crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("channel {channel}: {message}")]
    Channel { channel: String, message: String },

    #[error("spawn: {0}")]
    Spawn(String),

    #[error("storage: {0}")]
    Storage(String),

    /// Bad tool-layer input with a user-surfaceable message. Never retried.
    #[error("{0}")]
    ToolInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error class is safe to retry at the transport layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_) | Error::Io(_))
    }
}
