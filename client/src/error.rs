use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("unexpected message from backend: {0}")]
    Protocol(String),

    #[error("{0}")]
    Application(String),

    #[error("could not locate \"{address}\": {message}")]
    Geocode { address: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("another request is already in progress")]
    Busy,

    #[error("timed out waiting for the chat stream")]
    Timeout,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::Network(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}
