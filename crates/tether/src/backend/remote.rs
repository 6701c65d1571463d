//! Remote boundary
//!
//! Spawns the guest as a child process speaking the framed protocol over
//! stdin/stdout. stderr is inherited so guest logs land next to ours.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use tether_protocol::{spawn_io, BaseInfo, IoTasks, IsolationMode};

use super::{Channel, IsolationBackend};
use crate::error::TransportError;

const EXIT_GRACE: Duration = Duration::from_secs(5);
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Launch document: how to run a guest program.
///
/// ```toml
/// program = "/usr/bin/tether-script-host"
/// args = ["/plugins/hello/index.js"]
/// cwd = "/plugins/hello"
///
/// [env]
/// RUST_LOG = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// What to start for one plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub plugin_id: String,
    /// Normalised entry resource
    pub entry: String,
    /// Package root, if the plugin came from a package
    pub root: Option<PathBuf>,
}

/// Byte-stream connection to a launched guest.
pub struct RemoteConnection {
    pub reader: Box<dyn AsyncRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
    /// Child process to reap on shutdown, if any
    pub child: Option<Child>,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<RemoteConnection, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Process launcher
// ─────────────────────────────────────────────────────────────────────────────

/// Launches guests as child processes.
///
/// A `.toml` entry is read as a [`LaunchSpec`]; any other entry is run as an
/// executable with the package root as working directory.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    async fn resolve_spec(request: &LaunchRequest) -> Result<LaunchSpec, TransportError> {
        let entry = Path::new(&request.entry);
        if entry.extension().is_some_and(|ext| ext == "toml") {
            let text = tokio::fs::read_to_string(entry).await.map_err(|e| {
                TransportError::Launch(format!("cannot read {}: {}", entry.display(), e))
            })?;
            return LaunchSpec::from_toml(&text).map_err(|e| {
                TransportError::Launch(format!("invalid launch document {}: {}", entry.display(), e))
            });
        }

        let mut spec = LaunchSpec::new(entry);
        spec.cwd = request.root.clone();
        Ok(spec)
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<RemoteConnection, TransportError> {
        let spec = Self::resolve_spec(request).await?;

        info!(
            plugin = %request.plugin_id,
            program = %spec.program.display(),
            "Spawning plugin process"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .env("TETHER_PLUGIN_ID", &request.plugin_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Launch(format!("failed to spawn {}: {}", spec.program.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Launch("failed to get stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Launch("failed to get stdout".into()))?;

        Ok(RemoteConnection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

pub struct RemoteBoundary {
    launcher: Arc<dyn Launcher>,
    request: LaunchRequest,
    handshake_timeout: Duration,
    io: Option<IoTasks>,
    child: Option<Child>,
}

impl RemoteBoundary {
    pub fn new(launcher: Arc<dyn Launcher>, request: LaunchRequest, handshake_timeout: Duration) -> Self {
        Self {
            launcher,
            request,
            handshake_timeout,
            io: None,
            child: None,
        }
    }
}

#[async_trait]
impl IsolationBackend for RemoteBoundary {
    fn mode(&self) -> IsolationMode {
        IsolationMode::Remote
    }

    fn handshake_timeout(&self) -> Option<Duration> {
        Some(self.handshake_timeout)
    }

    async fn start(&mut self, info: &BaseInfo) -> Result<Channel, TransportError> {
        let conn = self.launcher.launch(&self.request).await?;
        let (tx, rx, io) = spawn_io(info.id.clone(), conn.reader, conn.writer);

        self.io = Some(io);
        self.child = conn.child;
        debug!(plugin = %info.id, "Remote guest started");
        Ok(Channel { tx, rx })
    }

    async fn shutdown(&mut self) {
        let plugin = &self.request.plugin_id;

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(plugin = %plugin, %status, "Plugin process exited");
                }
                Ok(Err(e)) => {
                    error!(plugin = %plugin, error = %e, "Error waiting for plugin process");
                }
                Err(_) => {
                    warn!(plugin = %plugin, "Plugin process did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }

        if let Some(io) = self.io.take() {
            let IoTasks { mut reader, writer } = io;
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
            writer.abort();
        }
    }
}
