//! Guest-side handle back to the host

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use tether_protocol::{
    BaseInfo, CallError, CallMessage, CorrelationTable, LogLevel, LogMessage, Message,
    ThemeOptions, API_CALL, PROVIDER_THEME, SETTINGS_UPDATE,
};

use crate::error::{GuestError, GuestResult};
use crate::namespace::Namespace;

/// Default timeout for correlated calls made by a guest.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle given to every `Guest` callback.
///
/// Cheap to clone; all clones talk over the same channel.
#[derive(Clone)]
pub struct GuestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    outbound: mpsc::UnboundedSender<Message>,
    table: Arc<CorrelationTable>,
    info: RwLock<BaseInfo>,
    namespace: Namespace,
    call_timeout: Duration,
}

impl GuestContext {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<Message>,
        table: Arc<CorrelationTable>,
        namespace: Namespace,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                outbound,
                table,
                info: RwLock::new(BaseInfo::default()),
                namespace,
                call_timeout,
            }),
        }
    }

    /// Identity and settings as last received from the host.
    pub fn info(&self) -> BaseInfo {
        self.inner.info.read().clone()
    }

    pub fn id(&self) -> String {
        self.inner.info.read().id.clone()
    }

    pub fn settings(&self) -> Value {
        self.inner.info.read().settings.clone()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    pub(crate) fn set_info(&self, info: BaseInfo) {
        *self.inner.info.write() = info;
    }

    pub(crate) fn set_settings(&self, settings: Value) {
        self.inner.info.write().settings = settings;
    }

    pub(crate) fn send(&self, msg: Message) -> GuestResult<()> {
        self.inner.outbound.send(msg).map_err(|_| GuestError::Closed)
    }

    /// Fire-and-forget call to the host.
    pub fn call(&self, ty: &str, payload: Value) -> GuestResult<()> {
        self.send(Message::Call(CallMessage::new(ty, payload)))
    }

    /// Correlated call to the host; resolves with the host's reply.
    pub async fn call_async(&self, ty: &str, payload: Value) -> GuestResult<Value> {
        let pending = self
            .inner
            .table
            .register(ty, Some(self.inner.call_timeout));
        let tag = pending.tag();

        self.send(Message::Call(CallMessage::correlated(ty, payload, tag)))?;
        debug!(tag, call = ty, "Awaiting host reply");
        Ok(pending.wait().await?)
    }

    /// Invoke a host-exported operation.
    pub async fn invoke(&self, method: &str, args: Value) -> GuestResult<Value> {
        let payload = json!({ "method": method, "args": args });
        match self.call_async(API_CALL, payload).await {
            Ok(value) => Ok(value),
            Err(GuestError::Call(CallError::Remote(e))) => Err(GuestError::HostApi(e)),
            Err(e) => Err(e),
        }
    }

    /// Typed variant of [`invoke`](Self::invoke).
    pub async fn invoke_as<A: Serialize>(&self, method: &str, args: &A) -> GuestResult<Value> {
        self.invoke(method, serde_json::to_value(args)?).await
    }

    /// Patch this guest's settings. The host merges the patch and persists it.
    pub fn update_settings(&self, patch: Value) -> GuestResult<()> {
        {
            let mut info = self.inner.info.write();
            if let (Value::Object(current), Value::Object(changes)) = (&mut info.settings, &patch) {
                for (k, v) in changes {
                    current.insert(k.clone(), v.clone());
                }
            }
        }
        self.call(SETTINGS_UPDATE, patch)
    }

    /// Contribute a theme to the host.
    pub fn register_theme(&self, theme: ThemeOptions) -> GuestResult<()> {
        self.call(PROVIDER_THEME, serde_json::to_value(theme)?)
    }

    /// Forward a log line into the host-side plugin logger.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> GuestResult<()> {
        self.send(Message::Log(LogMessage {
            level,
            message: message.into(),
        }))
    }

    pub fn info_log(&self, message: impl Into<String>) -> GuestResult<()> {
        self.log(LogLevel::Info, message)
    }

    pub fn error_log(&self, message: impl Into<String>) -> GuestResult<()> {
        self.log(LogLevel::Error, message)
    }
}
