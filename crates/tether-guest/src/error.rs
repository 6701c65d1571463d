use tether_protocol::{CallError, FrameError, RemoteError};

/// Guest SDK errors
#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    #[error("Host channel closed")]
    Closed,

    #[error("Call failed: {0}")]
    Call(#[from] CallError),

    #[error("Host API error: {0}")]
    HostApi(RemoteError),

    #[error("Unknown call type: {0}")]
    UnknownCall(String),

    #[error("{0}")]
    Handler(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),
}

impl GuestError {
    /// Shorthand for a handler-level failure.
    pub fn handler(message: impl Into<String>) -> Self {
        GuestError::Handler(message.into())
    }
}

pub type GuestResult<T> = Result<T, GuestError>;
