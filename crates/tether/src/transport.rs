//! Transport
//!
//! One calling contract over either isolation backend:
//!
//! - `call` is fire-and-forget and is mirrored as a local
//!   [`TransportEvent::Outbound`]
//! - `call_async` attaches a correlation tag and resolves on the matching
//!   reply or rejects on timeout, whichever happens first
//! - guest `api:call` messages are dispatched to the [`HostApi`]; a failing
//!   operation is returned as a tagged error value inside a normal reply
//! - hooks are sent as `{namespace, type, payload}` and mirrored locally so
//!   host-side listeners can subscribe with [`Transport::on_hook`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use tether_protocol::{
    BaseInfo, BeforeUnloadMessage, CallMessage, CorrelationTable, Hook, HookMessage, IsolationMode,
    LogMessage, Message, ReplyMessage, API_CALL, CORRELATION_TAG,
};

use crate::backend::{Channel, IsolationBackend};
use crate::error::TransportError;
use crate::events::{EventBus, SubscriptionId};
use crate::host_api::HostApi;
use crate::logger::PluginLogger;

const READER_GRACE: Duration = Duration::from_secs(1);

/// Things a transport raises locally.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A broadcast sent to the guest.
    Outbound { ty: String, payload: Value },
    /// A call from the guest (correlation tag removed).
    Inbound { ty: String, payload: Value },
    /// A hook sent to the guest.
    Hook { hook: Hook, payload: Value },
    /// The guest channel ended.
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub call_timeout: Duration,
    pub sweep_interval: Duration,
    pub high_water: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(30 * 60),
            high_water: tether_protocol::correlation::DEFAULT_HIGH_WATER,
        }
    }
}

/// Everything the inbound loop needs.
struct Inbound {
    plugin_id: String,
    tx: mpsc::UnboundedSender<Message>,
    table: Arc<CorrelationTable>,
    host_api: Arc<HostApi>,
    logger: PluginLogger,
    events: Arc<EventBus<TransportEvent>>,
}

pub struct Transport {
    plugin_id: String,
    mode: IsolationMode,
    tx: mpsc::UnboundedSender<Message>,
    table: Arc<CorrelationTable>,
    call_timeout: Duration,
    backend: tokio::sync::Mutex<Box<dyn IsolationBackend>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    events: Arc<EventBus<TransportEvent>>,
}

impl Transport {
    /// Start the backend and complete the handshake.
    ///
    /// Fails with `HandshakeTimeout` if the backend bounds the handshake and
    /// the guest does not acknowledge in time, or `Closed` if the guest goes
    /// away first. The backend is shut down on failure.
    pub async fn connect(
        info: BaseInfo,
        mut backend: Box<dyn IsolationBackend>,
        options: TransportOptions,
        host_api: Arc<HostApi>,
        logger: PluginLogger,
        events: Arc<EventBus<TransportEvent>>,
    ) -> Result<Arc<Self>, TransportError> {
        let plugin_id = info.id.clone();
        let mode = backend.mode();

        let Channel { tx, rx } = match backend.start(&info).await {
            Ok(channel) => channel,
            Err(e) => {
                backend.shutdown().await;
                return Err(e);
            }
        };

        let table = Arc::new(CorrelationTable::new(options.high_water));
        let (ack_tx, ack_rx) = oneshot::channel();
        let inbound = Inbound {
            plugin_id: plugin_id.clone(),
            tx: tx.clone(),
            table: table.clone(),
            host_api,
            logger,
            events: events.clone(),
        };
        let reader = tokio::spawn(read_loop(inbound, rx, ack_tx));

        debug!(plugin = %plugin_id, ?mode, "Sending handshake");
        let handshake = match tx.send(Message::Handshake(info)) {
            Ok(()) => await_ack(&plugin_id, ack_rx, backend.handshake_timeout()).await,
            Err(_) => Err(TransportError::Closed(plugin_id.clone())),
        };

        if let Err(e) = handshake {
            warn!(plugin = %plugin_id, error = %e, "Handshake failed");
            let _ = tx.send(Message::Shutdown);
            reader.abort();
            backend.shutdown().await;
            table.close_all();
            return Err(e);
        }

        info!(plugin = %plugin_id, ?mode, "Guest connected");
        let sweeper = table.spawn_sweeper(options.sweep_interval);

        Ok(Arc::new(Self {
            plugin_id,
            mode,
            tx,
            table,
            call_timeout: options.call_timeout,
            backend: tokio::sync::Mutex::new(backend),
            reader: Mutex::new(Some(reader)),
            sweeper: Mutex::new(Some(sweeper)),
            closed: AtomicBool::new(false),
            events,
        }))
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    /// Correlated calls still awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.table.pending()
    }

    fn send(&self, msg: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(self.plugin_id.clone()));
        }
        self.tx
            .send(msg)
            .map_err(|_| TransportError::Closed(self.plugin_id.clone()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    /// Fire-and-forget call.
    pub fn call(&self, ty: &str, payload: Value) -> Result<(), TransportError> {
        self.send(Message::Call(CallMessage::new(ty, payload.clone())))?;
        self.events.emit(&TransportEvent::Outbound {
            ty: ty.to_string(),
            payload,
        });
        Ok(())
    }

    /// Correlated call with the default timeout.
    pub async fn call_async(&self, ty: &str, payload: Value) -> Result<Value, TransportError> {
        self.call_async_with_timeout(ty, payload, self.call_timeout).await
    }

    pub async fn call_async_with_timeout(
        &self,
        ty: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let pending = self.table.register(ty, Some(timeout));
        trace!(plugin = %self.plugin_id, tag = pending.tag(), ty = %ty, "Correlated call");
        self.send(Message::Call(CallMessage::correlated(ty, payload, pending.tag())))?;
        Ok(pending.wait().await?)
    }

    /// Send a hook to the guest and raise it locally.
    pub fn call_hook(&self, hook: &Hook, payload: Value) -> Result<(), TransportError> {
        self.send(Message::Hook(HookMessage {
            hook: hook.clone(),
            payload: payload.clone(),
        }))?;
        self.events.emit(&TransportEvent::Hook {
            hook: hook.clone(),
            payload,
        });
        Ok(())
    }

    /// Listen for one hook on the local bus.
    pub fn on_hook<F>(&self, hook: Hook, listener: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let TransportEvent::Hook { hook: h, payload } = event {
                if *h == hook {
                    listener(payload);
                }
            }
        })
    }

    pub fn on<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle signals
    // ─────────────────────────────────────────────────────────────────────────

    pub fn signal_ready(&self, info: BaseInfo) -> Result<(), TransportError> {
        debug!(plugin = %self.plugin_id, "Signalling ready");
        self.send(Message::Ready(info))
    }

    pub fn send_settings(&self, settings: Value) -> Result<(), TransportError> {
        self.send(Message::Settings(settings))
    }

    /// Ask the guest to clean up and wait for its acknowledgement.
    pub async fn before_unload(&self, unregister: bool) -> Result<(), TransportError> {
        let pending = self.table.register("before_unload", Some(self.call_timeout));
        self.send(Message::BeforeUnload(BeforeUnloadMessage {
            correlation_tag: pending.tag(),
            unregister,
        }))?;
        pending.wait().await?;
        Ok(())
    }

    /// Shut the guest down and release everything. Idempotent.
    pub async fn destroy(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(plugin = %self.plugin_id, "Destroying transport");

        let _ = self.tx.send(Message::Shutdown);
        self.backend.lock().await.shutdown().await;

        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let reader = self.reader.lock().take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(READER_GRACE, &mut reader).await.is_err() {
                reader.abort();
                self.events.emit(&TransportEvent::Closed);
            }
        }
        self.table.close_all();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

async fn await_ack(
    plugin_id: &str,
    ack: oneshot::Receiver<()>,
    limit: Option<Duration>,
) -> Result<(), TransportError> {
    let acked = match limit {
        Some(after) => match tokio::time::timeout(after, ack).await {
            Ok(result) => result,
            Err(_) => {
                return Err(TransportError::HandshakeTimeout {
                    plugin: plugin_id.to_string(),
                    after,
                });
            }
        },
        None => ack.await,
    };
    acked.map_err(|_| TransportError::Closed(plugin_id.to_string()))
}

fn strip_tag(mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.remove(CORRELATION_TAG);
    }
    payload
}

async fn read_loop(
    inbound: Inbound,
    mut rx: mpsc::UnboundedReceiver<Message>,
    ack: oneshot::Sender<()>,
) {
    let mut ack = Some(ack);

    while let Some(msg) = rx.recv().await {
        match msg {
            Message::HandshakeAck => {
                if let Some(ack) = ack.take() {
                    let _ = ack.send(());
                }
            }
            Message::Reply(reply) => {
                let tag = reply.correlation_tag;
                if !inbound.table.resolve(tag, reply.into_result()) {
                    debug!(plugin = %inbound.plugin_id, tag, "Dropped late reply");
                }
            }
            Message::Log(LogMessage { level, message }) => inbound.logger.log(level, message),
            Message::Call(call) if call.ty == API_CALL => dispatch_api_call(&inbound, call),
            Message::Call(call) => {
                let tag = call.correlation_tag();
                inbound.events.emit(&TransportEvent::Inbound {
                    ty: call.ty,
                    payload: strip_tag(call.payload),
                });
                if let Some(tag) = tag {
                    let _ = inbound.tx.send(Message::Reply(ReplyMessage::ok(tag, Value::Null)));
                }
            }
            other => {
                debug!(plugin = %inbound.plugin_id, kind = ?other.kind(), "Ignoring message from guest");
            }
        }
    }

    let failed = inbound.table.close_all();
    debug!(plugin = %inbound.plugin_id, failed, "Guest channel closed");
    inbound.events.emit(&TransportEvent::Closed);
}

fn dispatch_api_call(inbound: &Inbound, call: CallMessage) {
    let tag = call.correlation_tag();
    let plugin_id = inbound.plugin_id.clone();
    let host_api = inbound.host_api.clone();
    let tx = inbound.tx.clone();

    tokio::spawn(async move {
        let result = host_api.dispatch_payload(&plugin_id, &call.payload).await;
        match (tag, result) {
            (Some(tag), Ok(value)) => {
                let _ = tx.send(Message::Reply(ReplyMessage::ok(tag, value)));
            }
            (Some(tag), Err(e)) => {
                let _ = tx.send(Message::Reply(ReplyMessage::err(tag, &e)));
            }
            (None, Err(e)) => {
                warn!(plugin = %plugin_id, error = %e, "Host operation failed");
            }
            (None, Ok(_)) => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SameContext;
    use crate::catalog::GuestCatalog;
    use async_trait::async_trait;
    use serde_json::json;
    use tether_guest::{Guest, GuestContext, GuestError, GuestResult};
    use tether_protocol::CallError;

    struct Echo;

    #[async_trait]
    impl Guest for Echo {
        async fn on_call(&self, ctx: &GuestContext, ty: &str, payload: Value) -> GuestResult<Value> {
            match ty {
                "echo" => Ok(payload),
                "ask" => ctx.invoke("answer", json!([])).await,
                "fail" => Err(GuestError::handler("nope")),
                _ => Err(GuestError::UnknownCall(ty.to_string())),
            }
        }
    }

    /// Backend whose guest never answers.
    struct Silent {
        guest_end: Option<mpsc::UnboundedReceiver<Message>>,
        guest_tx: Option<mpsc::UnboundedSender<Message>>,
        limit: Option<Duration>,
    }

    #[async_trait]
    impl IsolationBackend for Silent {
        fn mode(&self) -> IsolationMode {
            IsolationMode::Remote
        }

        fn handshake_timeout(&self) -> Option<Duration> {
            self.limit
        }

        async fn start(&mut self, _info: &BaseInfo) -> Result<Channel, TransportError> {
            let (host_tx, guest_rx) = mpsc::unbounded_channel();
            let (guest_tx, host_rx) = mpsc::unbounded_channel();
            self.guest_end = Some(guest_rx);
            self.guest_tx = Some(guest_tx);
            Ok(Channel {
                tx: host_tx,
                rx: host_rx,
            })
        }

        async fn shutdown(&mut self) {
            self.guest_end = None;
            self.guest_tx = None;
        }
    }

    fn info() -> BaseInfo {
        BaseInfo {
            id: "echo".into(),
            name: "echo".into(),
            ..Default::default()
        }
    }

    async fn connect_echo(host_api: HostApi) -> Arc<Transport> {
        let catalog = Arc::new(GuestCatalog::new().with("echo", || Echo));
        let backend = Box::new(SameContext::new(catalog, "echo".into(), Duration::from_secs(5)));
        Transport::connect(
            info(),
            backend,
            TransportOptions::default(),
            Arc::new(host_api),
            PluginLogger::new("echo"),
            Arc::new(EventBus::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_correlated_round_trip() {
        let transport = connect_echo(HostApi::default()).await;
        let value = transport.call_async("echo", json!({"n": 1})).await.unwrap();
        assert_eq!(value, json!({"n": 1}));
        assert_eq!(transport.pending_calls(), 0);
        transport.destroy().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_guest_handler_error_rejects_call() {
        let transport = connect_echo(HostApi::default()).await;
        let err = transport.call_async("fail", json!({})).await.unwrap_err();
        match err {
            TransportError::Call(CallError::Remote(e)) => {
                assert_eq!(e.method.as_deref(), Some("fail"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // the channel survives
        assert!(transport.call_async("echo", json!({})).await.is_ok());
        transport.destroy().await;
    }

    #[tokio::test]
    async fn test_guest_invokes_host_api() {
        let api = HostApi::builder()
            .register_sync("answer", |_call| Ok(json!(42)))
            .build();
        let transport = connect_echo(api).await;
        assert_eq!(transport.call_async("ask", json!({})).await.unwrap(), json!(42));
        transport.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let backend = Box::new(Silent {
            guest_end: None,
            guest_tx: None,
            limit: Some(Duration::from_secs(8)),
        });
        let result = Transport::connect(
            info(),
            backend,
            TransportOptions::default(),
            Arc::new(HostApi::default()),
            PluginLogger::new("echo"),
            Arc::new(EventBus::new()),
        )
        .await;
        assert!(matches!(
            result,
            Err(TransportError::HandshakeTimeout { after, .. }) if after == Duration::from_secs(8)
        ));
    }

    #[tokio::test]
    async fn test_hook_mirrored_locally() {
        let transport = connect_echo(HostApi::default()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = transport.on_hook(Hook::app("routeChanged"), move |payload| {
            sink.lock().push(payload.clone())
        });

        transport
            .call_hook(&Hook::app("route_changed"), json!({"path": "/"}))
            .unwrap();
        transport.call_hook(&Hook::editor("blockChanged"), json!({})).unwrap();
        assert_eq!(*seen.lock(), vec![json!({"path": "/"})]);

        assert!(transport.off(id));
        transport.destroy().await;
    }
}
