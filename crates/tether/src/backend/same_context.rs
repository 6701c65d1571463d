//! Same-context boundary
//!
//! Runs the guest on the host's own runtime. The guest gets a fresh
//! `Namespace`; messages still go through channels so callers see the same
//! contract as the remote boundary. The handshake completes when the
//! guest's `init` returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tether_guest::{GuestResult, GuestRuntime, Namespace};
use tether_protocol::{BaseInfo, IsolationMode};

use super::{Channel, IsolationBackend};
use crate::catalog::GuestCatalog;
use crate::error::TransportError;

const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct SameContext {
    catalog: Arc<GuestCatalog>,
    entry: String,
    call_timeout: Duration,
    namespace: Namespace,
    task: Option<JoinHandle<GuestResult<()>>>,
}

impl SameContext {
    pub fn new(catalog: Arc<GuestCatalog>, entry: String, call_timeout: Duration) -> Self {
        Self {
            catalog,
            entry,
            call_timeout,
            namespace: Namespace::new(),
            task: None,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

#[async_trait]
impl IsolationBackend for SameContext {
    fn mode(&self) -> IsolationMode {
        IsolationMode::SameContext
    }

    fn handshake_timeout(&self) -> Option<Duration> {
        None
    }

    async fn start(&mut self, info: &BaseInfo) -> Result<Channel, TransportError> {
        let guest = self.catalog.create(&self.entry).ok_or_else(|| {
            TransportError::Launch(format!("no in-process guest named '{}'", self.entry))
        })?;

        let (host_tx, guest_rx) = mpsc::unbounded_channel();
        let (guest_tx, host_rx) = mpsc::unbounded_channel();

        let runtime = GuestRuntime::from_arc(guest)
            .with_namespace(self.namespace.clone())
            .with_call_timeout(self.call_timeout);
        self.task = Some(tokio::spawn(runtime.run(guest_rx, guest_tx)));

        debug!(plugin = %info.id, entry = %self.entry, "Same-context guest started");
        Ok(Channel {
            tx: host_tx,
            rx: host_rx,
        })
    }

    async fn shutdown(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(EXIT_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(entry = %self.entry, error = %e, "Guest ended with error"),
            Ok(Err(e)) => warn!(entry = %self.entry, error = %e, "Guest task failed"),
            Err(_) => {
                warn!(entry = %self.entry, "Guest did not stop in time, aborting");
                task.abort();
            }
        }
    }
}
