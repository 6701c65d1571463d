//! Guest message loop
//!
//! Two tasks cooperate per session:
//!
//! - the pump drains the inbound channel, settles `Reply` messages in the
//!   guest's correlation table and forwards everything else
//! - the dispatch loop runs `Guest` callbacks one message at a time
//!
//! Because replies never wait behind a running callback, a callback may
//! await a correlated call to the host.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use tether_protocol::{
    CallMessage, CorrelationTable, HookMessage, LogLevel, Message, RemoteError, ReplyMessage,
    CORRELATION_TAG,
};

use crate::context::{GuestContext, DEFAULT_CALL_TIMEOUT};
use crate::error::GuestResult;
use crate::guest::Guest;
use crate::namespace::Namespace;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Drives one guest over a pair of message channels.
pub struct GuestRuntime {
    guest: Arc<dyn Guest>,
    namespace: Namespace,
    call_timeout: Duration,
}

impl GuestRuntime {
    pub fn new<G: Guest>(guest: G) -> Self {
        Self::from_arc(Arc::new(guest))
    }

    pub fn from_arc(guest: Arc<dyn Guest>) -> Self {
        Self {
            guest,
            namespace: Namespace::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Serve until the host sends `Shutdown` or closes the channel.
    pub async fn run(
        self,
        mut inbound: mpsc::UnboundedReceiver<Message>,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> GuestResult<()> {
        let table = Arc::new(CorrelationTable::default());
        let sweeper = table.spawn_sweeper(SWEEP_INTERVAL);
        let ctx = GuestContext::new(
            outbound,
            table.clone(),
            self.namespace.clone(),
            self.call_timeout,
        );

        let (work_tx, mut work_rx) = mpsc::unbounded_channel::<Message>();
        let pump_table = table.clone();
        let pump = tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                match msg {
                    Message::Reply(reply) => {
                        let tag = reply.correlation_tag;
                        pump_table.resolve(tag, reply.into_result());
                    }
                    other => {
                        if work_tx.send(other).is_err() {
                            break;
                        }
                    }
                }
            }
            pump_table.close_all();
        });

        let result = self.dispatch(&ctx, &mut work_rx).await;

        pump.abort();
        sweeper.abort();
        table.close_all();
        result
    }

    async fn dispatch(
        &self,
        ctx: &GuestContext,
        work_rx: &mut mpsc::UnboundedReceiver<Message>,
    ) -> GuestResult<()> {
        while let Some(msg) = work_rx.recv().await {
            match msg {
                Message::Handshake(info) => {
                    debug!(plugin = %info.id, "Handshake received");
                    ctx.set_info(info);
                    if let Err(e) = self.guest.init(ctx).await {
                        error!(error = %e, "Guest init failed");
                        let _ = ctx.log(LogLevel::Error, format!("init failed: {e}"));
                        return Err(e);
                    }
                    ctx.send(Message::HandshakeAck)?;
                }
                Message::Ready(info) => {
                    ctx.set_info(info.clone());
                    if let Err(e) = self.guest.on_ready(ctx, info).await {
                        warn!(error = %e, "Ready handler failed");
                    }
                }
                Message::Call(call) => self.handle_call(ctx, call).await?,
                Message::Hook(HookMessage { hook, payload }) => {
                    if let Err(e) = self.guest.on_hook(ctx, &hook, payload).await {
                        warn!(hook = %hook, error = %e, "Hook handler failed");
                    }
                }
                Message::Settings(settings) => {
                    ctx.set_settings(settings.clone());
                    if let Err(e) = self.guest.on_settings_changed(ctx, settings).await {
                        warn!(error = %e, "Settings handler failed");
                    }
                }
                Message::BeforeUnload(msg) => {
                    let reply = match self.guest.before_unload(ctx, msg.unregister).await {
                        Ok(()) => ReplyMessage::ok(msg.correlation_tag, Value::Null),
                        Err(e) => {
                            warn!(error = %e, "Before-unload handler failed");
                            ReplyMessage::err(
                                msg.correlation_tag,
                                &RemoteError::for_method("before_unload", e.to_string()),
                            )
                        }
                    };
                    ctx.send(Message::Reply(reply))?;
                }
                Message::Shutdown => {
                    debug!("Shutdown received");
                    break;
                }
                other => {
                    debug!(kind = ?other.kind(), "Ignoring unexpected message");
                }
            }
        }
        Ok(())
    }

    async fn handle_call(&self, ctx: &GuestContext, call: CallMessage) -> GuestResult<()> {
        let tag = call.correlation_tag();
        let CallMessage { ty, mut payload } = call;
        if tag.is_some() {
            if let Value::Object(map) = &mut payload {
                map.remove(CORRELATION_TAG);
            }
        }

        let result = self.guest.on_call(ctx, &ty, payload).await;
        match (tag, result) {
            (Some(tag), Ok(value)) => ctx.send(Message::Reply(ReplyMessage::ok(tag, value)))?,
            (Some(tag), Err(e)) => {
                warn!(call = %ty, error = %e, "Call handler failed");
                let error = RemoteError::for_method(ty, e.to_string());
                ctx.send(Message::Reply(ReplyMessage::err(tag, &error)))?;
            }
            (None, Ok(_)) => {}
            (None, Err(e)) => warn!(call = %ty, error = %e, "Broadcast handler failed"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuestError;
    use async_trait::async_trait;
    use serde_json::json;
    use tether_protocol::{BaseInfo, API_CALL};
    use tokio::task::JoinHandle;

    struct Echo;

    #[async_trait]
    impl Guest for Echo {
        async fn init(&self, ctx: &GuestContext) -> GuestResult<()> {
            ctx.namespace().set("booted", json!(true));
            Ok(())
        }

        async fn on_call(&self, ctx: &GuestContext, ty: &str, payload: Value) -> GuestResult<Value> {
            match ty {
                "echo" => Ok(payload),
                "fail" => Err(GuestError::handler("nope")),
                "lookup" => ctx.invoke("get_page", payload).await,
                "booted" => Ok(ctx.namespace().get("booted").unwrap_or(Value::Null)),
                other => Err(GuestError::UnknownCall(other.to_string())),
            }
        }
    }

    struct Harness {
        tx: mpsc::UnboundedSender<Message>,
        rx: mpsc::UnboundedReceiver<Message>,
        handle: JoinHandle<GuestResult<()>>,
    }

    fn start<G: Guest>(guest: G) -> Harness {
        let (tx, guest_rx) = mpsc::unbounded_channel();
        let (guest_tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(GuestRuntime::new(guest).run(guest_rx, guest_tx));
        Harness { tx, rx, handle }
    }

    async fn handshake(h: &mut Harness) {
        h.tx
            .send(Message::Handshake(BaseInfo {
                id: "echo".into(),
                name: "echo".into(),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(h.rx.recv().await.unwrap(), Message::HandshakeAck);
    }

    fn reply(msg: Message) -> ReplyMessage {
        match msg {
            Message::Reply(reply) => reply,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_correlated_calls_and_errors() {
        let mut h = start(Echo);
        handshake(&mut h).await;

        h.tx.send(Message::Call(CallMessage::correlated("echo", json!({"x": 1}), 1)))
            .unwrap();
        let r = reply(h.rx.recv().await.unwrap());
        assert_eq!(r.correlation_tag, 1);
        assert_eq!(r.result, json!({"x": 1}));

        h.tx.send(Message::Call(CallMessage::correlated("fail", Value::Null, 2)))
            .unwrap();
        let err = reply(h.rx.recv().await.unwrap()).into_result().unwrap_err();
        assert_eq!(err.method.as_deref(), Some("fail"));
        assert_eq!(err.message, "nope");

        // broadcast failure is swallowed: no reply is produced
        h.tx.send(Message::Call(CallMessage::new("fail", json!({}))))
            .unwrap();
        h.tx.send(Message::Call(CallMessage::correlated("booted", Value::Null, 3)))
            .unwrap();
        let r = reply(h.rx.recv().await.unwrap());
        assert_eq!(r.correlation_tag, 3);
        assert_eq!(r.result, json!(true));

        h.tx.send(Message::Shutdown).unwrap();
        assert!(h.handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_handler_can_call_back_into_host() {
        let mut h = start(Echo);
        handshake(&mut h).await;

        h.tx.send(Message::Call(CallMessage::correlated("lookup", json!({"name": "a"}), 5)))
            .unwrap();

        let api = match h.rx.recv().await.unwrap() {
            Message::Call(call) => call,
            other => panic!("expected api call, got {other:?}"),
        };
        assert_eq!(api.ty, API_CALL);
        assert_eq!(api.payload["method"], "get_page");
        assert_eq!(api.payload["args"], json!({"name": "a"}));
        let tag = api.correlation_tag().unwrap();

        h.tx.send(Message::Reply(ReplyMessage::ok(tag, json!({"title": "A"}))))
            .unwrap();

        let r = reply(h.rx.recv().await.unwrap());
        assert_eq!(r.correlation_tag, 5);
        assert_eq!(r.result, json!({"title": "A"}));
    }

    #[tokio::test]
    async fn test_host_api_error_surfaces_as_tagged_error() {
        let mut h = start(Echo);
        handshake(&mut h).await;

        h.tx.send(Message::Call(CallMessage::correlated("lookup", json!({}), 9)))
            .unwrap();
        let api = match h.rx.recv().await.unwrap() {
            Message::Call(call) => call,
            other => panic!("expected api call, got {other:?}"),
        };
        let tag = api.correlation_tag().unwrap();
        h.tx.send(Message::Reply(ReplyMessage::err(
            tag,
            &RemoteError::for_method("get_page", "missing"),
        )))
        .unwrap();

        let err = reply(h.rx.recv().await.unwrap()).into_result().unwrap_err();
        assert!(err.message.contains("missing"));
    }

    #[tokio::test]
    async fn test_before_unload_replies() {
        let mut h = start(Echo);
        handshake(&mut h).await;

        h.tx.send(Message::BeforeUnload(tether_protocol::BeforeUnloadMessage {
            correlation_tag: 11,
            unregister: false,
        }))
        .unwrap();
        let r = reply(h.rx.recv().await.unwrap());
        assert_eq!(r.correlation_tag, 11);
        assert!(r.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_closed_channel_ends_session() {
        let mut h = start(Echo);
        handshake(&mut h).await;
        drop(h.tx);
        assert!(h.handle.await.unwrap().is_ok());
    }
}
