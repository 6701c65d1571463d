use async_trait::async_trait;
use serde_json::Value;

use tether_protocol::{BaseInfo, Hook};

use crate::context::GuestContext;
use crate::error::{GuestError, GuestResult};

/// A plugin's code, as seen by the runtime.
///
/// Every callback has a default body, so a guest only implements what it
/// handles. Callbacks run one at a time in message order.
#[async_trait]
pub trait Guest: Send + Sync + 'static {
    /// Top-level initialisation. Returning completes the handshake; an error
    /// aborts the session.
    async fn init(&self, _ctx: &GuestContext) -> GuestResult<()> {
        Ok(())
    }

    /// The host is ready to serve calls.
    async fn on_ready(&self, _ctx: &GuestContext, _info: BaseInfo) -> GuestResult<()> {
        Ok(())
    }

    /// A call from the host. For correlated calls the returned value is the
    /// reply; for broadcasts it is discarded.
    async fn on_call(&self, _ctx: &GuestContext, ty: &str, _payload: Value) -> GuestResult<Value> {
        Err(GuestError::UnknownCall(ty.to_string()))
    }

    async fn on_hook(&self, _ctx: &GuestContext, _hook: &Hook, _payload: Value) -> GuestResult<()> {
        Ok(())
    }

    async fn on_settings_changed(&self, _ctx: &GuestContext, _settings: Value) -> GuestResult<()> {
        Ok(())
    }

    /// Cleanup before the host tears this guest down. An error is reported
    /// to the host, which logs it and continues the teardown.
    async fn before_unload(&self, _ctx: &GuestContext, _unregister: bool) -> GuestResult<()> {
        Ok(())
    }
}
