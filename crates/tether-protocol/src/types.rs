//! Data types carried inside protocol messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a plugin's code is isolated from the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationMode {
    /// Separate execution context, reachable only through an async message channel.
    #[default]
    #[serde(rename = "remote", alias = "iframe")]
    Remote,
    /// Host's own thread with an isolated global namespace.
    #[serde(rename = "same-context", alias = "shadow")]
    SameContext,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationMode::Remote => write!(f, "remote"),
            IsolationMode::SameContext => write!(f, "same-context"),
        }
    }
}

/// Identity snapshot the host hands to a guest during the handshake and
/// again with the ready signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub mode: IsolationMode,
    /// Current settings snapshot (always an object)
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// A theme contributed by a plugin package or at runtime by a guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeOptions {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// "light" or "dark"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Owning plugin id, filled in by the host on registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
}

/// Log severity used by guest log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Log line forwarded from a guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// Application-level failure shipped back inside a successful reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{method}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            method: None,
            message: message.into(),
        }
    }

    pub fn for_method(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_mode_aliases() {
        let mode: IsolationMode = serde_json::from_str("\"shadow\"").unwrap();
        assert_eq!(mode, IsolationMode::SameContext);

        let mode: IsolationMode = serde_json::from_str("\"iframe\"").unwrap();
        assert_eq!(mode, IsolationMode::Remote);

        assert_eq!(
            serde_json::to_string(&IsolationMode::SameContext).unwrap(),
            "\"same-context\""
        );
    }

    #[test]
    fn test_remote_error_display() {
        assert_eq!(RemoteError::new("boom").to_string(), "boom");
        assert_eq!(
            RemoteError::for_method("get_page", "not found").to_string(),
            "get_page: not found"
        );
    }
}
