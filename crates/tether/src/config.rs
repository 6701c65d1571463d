//! Runtime configuration
//!
//! Layered with figment: built-in defaults, then `tether.toml` (or the file
//! given on the command line), then `TETHER_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "tether.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding user-installed plugin packages
    pub user_plugins_root: PathBuf,
    /// Directory for settings, preferences and generated files
    pub data_dir: PathBuf,
    /// Remote handshake bound
    pub handshake_timeout_ms: u64,
    /// Default bound for correlated calls
    pub call_timeout_ms: u64,
    /// Correlation sweep period
    pub sweep_interval_secs: u64,
    /// Table size above which the sweep removes settled entries
    pub sweep_high_water: usize,
    /// Program used to run script entries (`.js`, `.py`, ...)
    pub script_host: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            user_plugins_root: PathBuf::from("plugins"),
            data_dir: PathBuf::from(".tether"),
            handshake_timeout_ms: 8_000,
            call_timeout_ms: 10_000,
            sweep_interval_secs: 30 * 60,
            sweep_high_water: 100,
            script_host: None,
        }
    }
}

impl RuntimeConfig {
    /// Load using the default file name.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(Path::new(CONFIG_FILE)).extract()
    }

    /// Load from an explicit file (missing files are ignored).
    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RuntimeConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("TETHER_"))
    }

    /// Config rooted in a single directory (embedding and tests).
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            user_plugins_root: root.join("plugins"),
            data_dir: root.join("data"),
            ..Default::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_script_host(mut self, program: impl Into<PathBuf>) -> Self {
        self.script_host = Some(program.into());
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
