//! One-shot readiness gate
//!
//! Used for the "host mounted" signal and for batch readiness: waiters
//! suspend until the gate opens; once open it stays open.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Gate {
    pub fn new(open: bool) -> Self {
        let (tx, _rx) = watch::channel(open);
        Self { tx }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in self, so this cannot fail while we borrow it
        let _ = rx.wait_for(|open| *open).await;
    }
}
