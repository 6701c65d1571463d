//! Tether guest SDK
//!
//! Plugin-side half of the runtime. A plugin implements [`Guest`]; the
//! [`GuestRuntime`] drives it over a pair of message channels, either
//! in-memory (same-context isolation) or over stdio (remote isolation,
//! see [`serve_stdio`]).
//!
//! ```ignore
//! struct Hello;
//!
//! #[async_trait]
//! impl Guest for Hello {
//!     async fn on_call(&self, ctx: &GuestContext, ty: &str, payload: Value) -> GuestResult<Value> {
//!         let page = ctx.invoke("get_current_page", Value::Null).await?;
//!         Ok(json!({ "hello": page }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> GuestResult<()> {
//!     serve_stdio(Hello).await
//! }
//! ```

pub mod context;
pub mod error;
pub mod guest;
pub mod namespace;
pub mod runtime;
pub mod stdio;

pub use context::{GuestContext, DEFAULT_CALL_TIMEOUT};
pub use error::{GuestError, GuestResult};
pub use guest::Guest;
pub use namespace::Namespace;
pub use runtime::GuestRuntime;
pub use stdio::{init_stderr_logging, serve_runtime, serve_stdio};

pub use async_trait::async_trait;
pub use tether_protocol as protocol;
