//! Error types for the host runtime

use std::time::Duration;

use tether_protocol::{CallError, FrameError};

/// Errors raised by a host collaborator (`HostBridge`).
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while talking to a guest.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Handshake with '{plugin}' timed out after {after:?}")]
    HandshakeTimeout { plugin: String, after: Duration },

    #[error("Guest '{0}' closed the channel")]
    Closed(String),

    #[error("Failed to start guest: {0}")]
    Launch(String),

    #[error("Call failed: {0}")]
    Call(#[from] CallError),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),
}

/// Plugin-level errors.
///
/// `Descriptor` and `Duplicate` are non-fatal to a registration batch; the
/// registry logs them and continues with the next descriptor.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Invalid package descriptor at {url}: {reason}")]
    Descriptor { url: String, reason: String },

    #[error("Plugin '{0}' is already registered")]
    Duplicate(String),

    #[error("Plugin '{0}' not found")]
    NotFound(String),

    #[error("Handshake with '{plugin}' timed out after {after:?}")]
    HandshakeTimeout { plugin: String, after: Duration },

    #[error("Correlated call timed out after {0:?}")]
    CallTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Host bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl PluginError {
    pub fn descriptor(url: impl Into<String>, reason: impl ToString) -> Self {
        PluginError::Descriptor {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn lifecycle(reason: impl ToString) -> Self {
        PluginError::Lifecycle(reason.to_string())
    }

    /// Whether a batch keeps iterating without recording an instance.
    pub fn is_batch_recoverable(&self) -> bool {
        matches!(
            self,
            PluginError::Descriptor { .. } | PluginError::Duplicate(_)
        )
    }
}

impl From<TransportError> for PluginError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::HandshakeTimeout { plugin, after } => {
                PluginError::HandshakeTimeout { plugin, after }
            }
            TransportError::Call(CallError::Timeout { after, .. }) => PluginError::CallTimeout(after),
            other => PluginError::Transport(other),
        }
    }
}

impl From<CallError> for PluginError {
    fn from(e: CallError) -> Self {
        TransportError::Call(e).into()
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
