//! Isolation backends
//!
//! A backend starts a guest and hands back a message channel to it. The
//! transport layered on top is identical for both backends:
//!
//! - [`RemoteBoundary`]: the guest runs in a separate process and is
//!   reachable only through framed messages on a byte stream
//! - [`SameContext`]: the guest runs on the host's runtime with its own
//!   isolated namespace; messages pass through in-memory channels

mod remote;
mod same_context;

pub use remote::{LaunchRequest, LaunchSpec, Launcher, ProcessLauncher, RemoteBoundary, RemoteConnection};
pub use same_context::SameContext;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_protocol::{BaseInfo, IsolationMode, Message};

use crate::context::HostContext;
use crate::error::TransportError;

/// Host end of a started guest.
pub struct Channel {
    pub tx: mpsc::UnboundedSender<Message>,
    pub rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
pub trait IsolationBackend: Send + Sync {
    fn mode(&self) -> IsolationMode;

    /// Bound on the handshake, if the backend needs one.
    fn handshake_timeout(&self) -> Option<Duration>;

    /// Start the guest.
    async fn start(&mut self, info: &BaseInfo) -> Result<Channel, TransportError>;

    /// Release the guest once it has been asked to shut down.
    async fn shutdown(&mut self);
}

/// Pick the backend for an isolation mode.
pub fn create(
    ctx: &Arc<HostContext>,
    mode: IsolationMode,
    request: LaunchRequest,
) -> Box<dyn IsolationBackend> {
    match mode {
        IsolationMode::Remote => Box::new(RemoteBoundary::new(
            ctx.launcher.clone(),
            request,
            ctx.config.handshake_timeout(),
        )),
        IsolationMode::SameContext => Box::new(SameContext::new(
            ctx.catalog.clone(),
            request.entry,
            ctx.config.call_timeout(),
        )),
    }
}
