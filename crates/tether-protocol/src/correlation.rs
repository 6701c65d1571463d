//! Correlation table
//!
//! Tracks in-flight correlated calls. Each call gets a fresh, monotonically
//! increasing tag; the entry is settled exactly once, either by the reply
//! bearing that tag or by the caller's timeout, whichever comes first.
//! Replies remove their entry. Timed-out and abandoned entries stay marked
//! as settled until a sweep removes them; a sweep never touches an entry
//! that is still pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::types::RemoteError;

/// Default number of entries above which a sweep starts removing settled entries.
pub const DEFAULT_HIGH_WATER: usize = 100;

/// Why a correlated call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("correlated call #{tag} timed out after {after:?}")]
    Timeout { tag: u64, after: Duration },

    #[error("remote error: {0}")]
    Remote(RemoteError),

    #[error("channel closed")]
    Closed,
}

type Settle = oneshot::Sender<Result<Value, CallError>>;

struct Entry {
    label: String,
    created: Instant,
    settled: bool,
    tx: Option<Settle>,
}

/// In-flight request/response pairs keyed by tag.
pub struct CorrelationTable {
    next_tag: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
    high_water: usize,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER)
    }
}

impl CorrelationTable {
    pub fn new(high_water: usize) -> Self {
        Self {
            next_tag: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            high_water,
        }
    }

    /// Register a new call and return the handle its caller awaits.
    pub fn register(self: &Arc<Self>, label: impl Into<String>, timeout: Option<Duration>) -> PendingCall {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let label = label.into();

        trace!(tag, label = %label, "Registered correlated call");
        self.entries.lock().insert(
            tag,
            Entry {
                label,
                created: Instant::now(),
                settled: false,
                tx: Some(tx),
            },
        );

        PendingCall {
            tag,
            timeout,
            rx,
            table: Arc::downgrade(self),
            done: false,
        }
    }

    /// Deliver a reply. Returns false if the tag is unknown or already settled.
    pub fn resolve(&self, tag: u64, result: Result<Value, RemoteError>) -> bool {
        let tx = {
            let mut entries = self.entries.lock();
            match entries.get(&tag) {
                Some(entry) if !entry.settled => entries.remove(&tag).and_then(|e| e.tx),
                Some(entry) => {
                    debug!(tag, label = %entry.label, "Late reply ignored");
                    return false;
                }
                None => {
                    debug!(tag, "Reply for unknown tag ignored");
                    return false;
                }
            }
        };

        match tx {
            Some(tx) => {
                let _ = tx.send(result.map_err(CallError::Remote));
                true
            }
            None => false,
        }
    }

    /// Settle a pending entry with an error, leaving it for the sweep.
    pub fn reject(&self, tag: u64, error: CallError) -> bool {
        let tx = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&tag) {
                Some(entry) if !entry.settled => {
                    entry.settled = true;
                    entry.tx.take()
                }
                _ => return false,
            }
        };

        if let Some(tx) = tx {
            let _ = tx.send(Err(error));
        }
        true
    }

    /// Settle every pending entry with `CallError::Closed`.
    pub fn close_all(&self) -> usize {
        let senders: Vec<Settle> = {
            let mut entries = self.entries.lock();
            entries
                .values_mut()
                .filter(|e| !e.settled)
                .filter_map(|e| {
                    e.settled = true;
                    e.tx.take()
                })
                .collect()
        };

        let count = senders.len();
        for tx in senders {
            let _ = tx.send(Err(CallError::Closed));
        }
        count
    }

    /// Remove settled entries once the table grows past its high-water mark.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        if entries.len() <= self.high_water {
            return 0;
        }

        let before = entries.len();
        entries.retain(|_, e| !e.settled);
        let removed = before - entries.len();
        debug!(removed, remaining = entries.len(), "Swept correlation table");
        removed
    }

    /// Total entries, settled or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries still waiting for an outcome.
    pub fn pending(&self) -> usize {
        self.entries.lock().values().filter(|e| !e.settled).count()
    }

    /// Age of the oldest unsettled entry.
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.entries
            .lock()
            .values()
            .filter(|e| !e.settled)
            .map(|e| e.created.elapsed())
            .max()
    }

    /// Periodically sweep the table until it is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let table: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match table.upgrade() {
                    Some(table) => {
                        table.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

/// Awaitable handle for one correlated call.
///
/// Dropping it without awaiting marks the entry settled so the sweep can
/// reclaim it.
pub struct PendingCall {
    tag: u64,
    timeout: Option<Duration>,
    rx: oneshot::Receiver<Result<Value, CallError>>,
    table: Weak<CorrelationTable>,
    done: bool,
}

impl PendingCall {
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Wait for the reply or the timeout, whichever settles the entry first.
    pub async fn wait(mut self) -> Result<Value, CallError> {
        let outcome = match self.timeout {
            Some(after) => match tokio::time::timeout(after, &mut self.rx).await {
                Ok(received) => received.unwrap_or(Err(CallError::Closed)),
                Err(_) => {
                    let tag = self.tag;
                    let won = self
                        .table
                        .upgrade()
                        .map(|t| t.reject(tag, CallError::Timeout { tag, after }))
                        .unwrap_or(true);
                    if won {
                        // our own rejection is sitting in the channel
                        let _ = self.rx.try_recv();
                        Err(CallError::Timeout { tag, after })
                    } else {
                        // the reply settled the entry first
                        self.rx
                            .try_recv()
                            .unwrap_or(Err(CallError::Timeout { tag, after }))
                    }
                }
            },
            None => (&mut self.rx).await.unwrap_or(Err(CallError::Closed)),
        };
        self.done = true;
        outcome
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            let mut entries = table.entries.lock();
            if let Some(entry) = entries.get_mut(&self.tag) {
                entry.settled = true;
                entry.tx = None;
            }
        }
    }
}
