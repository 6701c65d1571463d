//! Out-of-process guests
//!
//! A guest binary calls [`serve_stdio`] from `main`: frames arrive on stdin,
//! frames leave on stdout, and logs go to stderr.

use std::io;
use std::time::Duration;

use tether_protocol::spawn_io;
use tracing::info;

use crate::error::GuestResult;
use crate::guest::Guest;
use crate::runtime::GuestRuntime;

const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Initialise tracing to stderr (stdout is for frames).
pub fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Serve a guest over stdin/stdout until the host shuts it down.
pub async fn serve_stdio<G: Guest>(guest: G) -> GuestResult<()> {
    init_stderr_logging();
    serve_runtime(GuestRuntime::new(guest)).await
}

/// Like [`serve_stdio`] for a preconfigured runtime.
pub async fn serve_runtime(runtime: GuestRuntime) -> GuestResult<()> {
    let (tx, rx, tasks) = spawn_io("host".to_string(), tokio::io::stdin(), tokio::io::stdout());
    info!("Guest serving on stdio");

    let result = runtime.run(rx, tx).await;

    // let queued frames reach the host before exiting
    let _ = tokio::time::timeout(FLUSH_GRACE, tasks.writer).await;
    tasks.reader.abort();
    result
}
