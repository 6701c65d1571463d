//! Message envelope
//!
//! Every exchange between host and guest is one `Message`. The remote
//! boundary encodes it as a frame (`[kind byte][JSON payload]`); the
//! same-context boundary passes the value through in-memory channels.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::frame::{Frame, FrameError};
use crate::hook::Hook;
use crate::types::{BaseInfo, LogMessage, RemoteError};

/// Payload key carrying the correlation tag of a correlated call.
pub const CORRELATION_TAG: &str = "correlationTag";

/// Key marking a reply result as an application-level error.
pub const ERROR_TAG: &str = "$$error";

/// Guest → host invocation of a host-exported operation (`{method, args}`).
pub const API_CALL: &str = "api:call";

/// Guest → host patch of the guest's own settings.
pub const SETTINGS_UPDATE: &str = "settings:update";

/// Guest → host theme contribution.
pub const PROVIDER_THEME: &str = "provider:theme";

/// Message kinds, as encoded in the frame header byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    // Host → Guest
    Handshake = 1,
    Ready = 2,
    Hook = 4,
    Settings = 5,
    BeforeUnload = 6,
    Shutdown = 8,

    // Both directions
    Call = 3,
    Reply = 7,

    // Guest → Host
    HandshakeAck = 10,
    Log = 11,
}

impl TryFrom<u8> for MessageKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            1 => Ok(MessageKind::Handshake),
            2 => Ok(MessageKind::Ready),
            3 => Ok(MessageKind::Call),
            4 => Ok(MessageKind::Hook),
            5 => Ok(MessageKind::Settings),
            6 => Ok(MessageKind::BeforeUnload),
            7 => Ok(MessageKind::Reply),
            8 => Ok(MessageKind::Shutdown),
            10 => Ok(MessageKind::HandshakeAck),
            11 => Ok(MessageKind::Log),
            _ => Err(FrameError::UnknownKind(value)),
        }
    }
}

/// A broadcast or correlated call: `{type, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub payload: Value,
}

impl CallMessage {
    pub fn new(ty: impl Into<String>, payload: Value) -> Self {
        Self {
            ty: ty.into(),
            payload,
        }
    }

    /// Build a correlated call. Non-object payloads are wrapped as
    /// `{"value": payload}` so the tag has somewhere to live.
    pub fn correlated(ty: impl Into<String>, payload: Value, tag: u64) -> Self {
        let mut object = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        object.insert(CORRELATION_TAG.to_string(), Value::from(tag));
        Self {
            ty: ty.into(),
            payload: Value::Object(object),
        }
    }

    pub fn correlation_tag(&self) -> Option<u64> {
        self.payload.get(CORRELATION_TAG).and_then(Value::as_u64)
    }
}

/// Hook broadcast: `{namespace, type, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookMessage {
    #[serde(flatten)]
    pub hook: Hook,
    #[serde(default)]
    pub payload: Value,
}

/// Correlated before-unload signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeforeUnloadMessage {
    #[serde(rename = "correlationTag")]
    pub correlation_tag: u64,
    #[serde(default)]
    pub unregister: bool,
}

/// Reply to a correlated call: `{correlationTag, result}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMessage {
    #[serde(rename = "correlationTag")]
    pub correlation_tag: u64,
    #[serde(default)]
    pub result: Value,
}

impl ReplyMessage {
    pub fn ok(correlation_tag: u64, result: Value) -> Self {
        Self {
            correlation_tag,
            result,
        }
    }

    pub fn err(correlation_tag: u64, error: &RemoteError) -> Self {
        Self {
            correlation_tag,
            result: error_value(error),
        }
    }

    /// Split the result into a value or the tagged application error.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        if let Some(tagged) = self.result.get(ERROR_TAG) {
            return Err(serde_json::from_value(tagged.clone())
                .unwrap_or_else(|_| RemoteError::new(tagged.to_string())));
        }
        Ok(self.result)
    }
}

/// Encode an application error as a tagged value.
pub fn error_value(error: &RemoteError) -> Value {
    let mut map = Map::new();
    map.insert(
        ERROR_TAG.to_string(),
        serde_json::to_value(error).unwrap_or(Value::Null),
    );
    Value::Object(map)
}

/// The logical envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Handshake(BaseInfo),
    HandshakeAck,
    Ready(BaseInfo),
    Call(CallMessage),
    Hook(HookMessage),
    Settings(Value),
    BeforeUnload(BeforeUnloadMessage),
    Reply(ReplyMessage),
    Shutdown,
    Log(LogMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Handshake(_) => MessageKind::Handshake,
            Message::HandshakeAck => MessageKind::HandshakeAck,
            Message::Ready(_) => MessageKind::Ready,
            Message::Call(_) => MessageKind::Call,
            Message::Hook(_) => MessageKind::Hook,
            Message::Settings(_) => MessageKind::Settings,
            Message::BeforeUnload(_) => MessageKind::BeforeUnload,
            Message::Reply(_) => MessageKind::Reply,
            Message::Shutdown => MessageKind::Shutdown,
            Message::Log(_) => MessageKind::Log,
        }
    }

    /// Encode into a frame.
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        let payload = match self {
            Message::Handshake(info) | Message::Ready(info) => serde_json::to_vec(info)?,
            Message::HandshakeAck | Message::Shutdown => Vec::new(),
            Message::Call(call) => serde_json::to_vec(call)?,
            Message::Hook(hook) => serde_json::to_vec(hook)?,
            Message::Settings(settings) => serde_json::to_vec(settings)?,
            Message::BeforeUnload(msg) => serde_json::to_vec(msg)?,
            Message::Reply(reply) => serde_json::to_vec(reply)?,
            Message::Log(log) => serde_json::to_vec(log)?,
        };
        Ok(Frame::new(self.kind(), payload))
    }

    /// Decode from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        let msg = match frame.kind {
            MessageKind::Handshake => Message::Handshake(frame.parse_json()?),
            MessageKind::HandshakeAck => Message::HandshakeAck,
            MessageKind::Ready => Message::Ready(frame.parse_json()?),
            MessageKind::Call => Message::Call(frame.parse_json()?),
            MessageKind::Hook => Message::Hook(frame.parse_json()?),
            MessageKind::Settings => Message::Settings(frame.parse_json()?),
            MessageKind::BeforeUnload => Message::BeforeUnload(frame.parse_json()?),
            MessageKind::Reply => Message::Reply(frame.parse_json()?),
            MessageKind::Shutdown => Message::Shutdown,
            MessageKind::Log => Message::Log(frame.parse_json()?),
        };
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_correlated_call_carries_tag() {
        let call = CallMessage::correlated("greet", json!({"name": "ada"}), 7);
        assert_eq!(call.correlation_tag(), Some(7));
        assert_eq!(call.payload["name"], "ada");

        let wrapped = CallMessage::correlated("count", json!(3), 8);
        assert_eq!(wrapped.payload, json!({"value": 3, "correlationTag": 8}));

        let plain = CallMessage::new("notify", json!({}));
        assert_eq!(plain.correlation_tag(), None);
    }

    #[test]
    fn test_reply_error_tag() {
        let reply = ReplyMessage::err(3, &RemoteError::for_method("get_page", "missing"));
        assert_eq!(
            reply.result,
            json!({"$$error": {"method": "get_page", "message": "missing"}})
        );
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.method.as_deref(), Some("get_page"));

        let ok = ReplyMessage::ok(4, json!([1, 2]));
        assert_eq!(ok.into_result().unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_hook_message_shape() {
        let frame = Message::Hook(HookMessage {
            hook: Hook::app("routeChanged"),
            payload: json!({"path": "/all-pages"}),
        })
        .to_frame()
        .unwrap();

        assert_eq!(frame.kind, MessageKind::Hook);
        let value: Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(
            value,
            json!({"namespace": "hook:app", "type": "route_changed", "payload": {"path": "/all-pages"}})
        );
    }

    #[test]
    fn test_empty_payload_kinds() {
        let frame = Message::Shutdown.to_frame().unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(Message::from_frame(&frame).unwrap(), Message::Shutdown);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(matches!(
            MessageKind::try_from(99),
            Err(FrameError::UnknownKind(99))
        ));
    }
}
