//! Tether wire protocol
//!
//! Shared vocabulary between the host runtime (`tether`) and guest plugins
//! (`tether-guest`):
//!
//! - `Message` / `MessageKind`: the logical envelope exchanged across an
//!   isolation boundary
//! - `FrameReader` / `FrameWriter`: length-prefixed framing over any async
//!   byte stream (used by the remote boundary)
//! - `CorrelationTable`: in-flight request/response bookkeeping with timeouts
//! - `Hook`: typed `{domain, event}` hook names

pub mod correlation;
pub mod frame;
pub mod hook;
pub mod message;
pub mod types;

pub use correlation::{CallError, CorrelationTable, PendingCall};
pub use frame::{spawn_io, Frame, FrameError, FrameReader, FrameWriter, IoTasks};
pub use hook::{to_snake_case, Hook, HookDomain};
pub use message::{
    error_value, BeforeUnloadMessage, CallMessage, HookMessage, Message, MessageKind,
    ReplyMessage, API_CALL, CORRELATION_TAG, ERROR_TAG, PROVIDER_THEME, SETTINGS_UPDATE,
};
pub use types::{BaseInfo, IsolationMode, LogLevel, LogMessage, RemoteError, ThemeOptions};
