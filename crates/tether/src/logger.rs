//! Per-plugin logger
//!
//! Writes through to `tracing` and keeps the most recent entries in memory
//! for diagnostics.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tether_protocol::LogLevel;

const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PluginLogger {
    tag: Arc<RwLock<String>>,
    capacity: usize,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl PluginLogger {
    pub fn new(tag: impl Into<String>) -> Self {
        Self::with_capacity(tag, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(tag: impl Into<String>, capacity: usize) -> Self {
        Self {
            tag: Arc::new(RwLock::new(tag.into())),
            capacity: capacity.max(1),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn tag(&self) -> String {
        self.tag.read().clone()
    }

    /// Rename once the plugin id is known.
    pub fn retag(&self, tag: impl Into<String>) {
        *self.tag.write() = tag.into();
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let tag = self.tag();
        match level {
            LogLevel::Trace => tracing::trace!(target: "plugin", plugin = %tag, "{}", message),
            LogLevel::Debug => tracing::debug!(target: "plugin", plugin = %tag, "{}", message),
            LogLevel::Info => tracing::info!(target: "plugin", plugin = %tag, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "plugin", plugin = %tag, "{}", message),
            LogLevel::Error => tracing::error!(target: "plugin", plugin = %tag, "{}", message),
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            level,
            timestamp: Utc::now(),
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message)
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_keeps_latest_entries() {
        let logger = PluginLogger::with_capacity("demo", 2);
        logger.info("one");
        logger.warn("two");
        logger.error("three");

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "two");
        assert_eq!(entries[1].level, LogLevel::Error);

        logger.retag("renamed");
        assert_eq!(logger.tag(), "renamed");
    }
}
