//! Host-exported operations
//!
//! Guests reach host functionality through a single reserved call type
//! carrying `{method, args}`. `HostApi` is the dispatch table behind it:
//! built once, read-only afterwards. Method names are normalised so that
//! `getCurrentPage`, `_get_current_page` and `$get_current_page` all reach
//! the same handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, warn};

use tether_protocol::{to_snake_case, RemoteError};

type Handler = Arc<dyn Fn(ApiCall) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// One invocation of a host operation.
#[derive(Debug, Clone)]
pub struct ApiCall {
    /// Calling plugin
    pub plugin_id: String,
    /// Normalised method name
    pub method: String,
    pub args: Value,
}

#[derive(Default, Clone)]
pub struct HostApi {
    handlers: HashMap<String, Handler>,
}

impl HostApi {
    pub fn builder() -> HostApiBuilder {
        HostApiBuilder::default()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(&normalize_method(method))
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Run a method. Failures come back as a `RemoteError` naming the method.
    pub async fn dispatch(&self, plugin_id: &str, method: &str, args: Value) -> Result<Value, RemoteError> {
        let name = normalize_method(method);
        let Some(handler) = self.handlers.get(&name).cloned() else {
            warn!(plugin = %plugin_id, method = %name, "Unknown host method");
            return Err(RemoteError::for_method(name, "unknown host method"));
        };

        debug!(plugin = %plugin_id, method = %name, "Host API call");
        let call = ApiCall {
            plugin_id: plugin_id.to_string(),
            method: name.clone(),
            args,
        };
        handler(call).await.map_err(|e| {
            warn!(plugin = %plugin_id, method = %name, error = %e, "Host API call failed");
            RemoteError::for_method(name, e.to_string())
        })
    }

    /// Dispatch a raw `{method, args}` payload.
    pub async fn dispatch_payload(&self, plugin_id: &str, payload: &Value) -> Result<Value, RemoteError> {
        let Some(method) = payload.get("method").and_then(Value::as_str) else {
            return Err(RemoteError::new("host call without a method"));
        };
        let args = payload.get("args").cloned().unwrap_or(Value::Null);
        self.dispatch(plugin_id, method, args).await
    }
}

#[derive(Default)]
pub struct HostApiBuilder {
    handlers: HashMap<String, Handler>,
}

impl HostApiBuilder {
    /// Register an async handler. Later registrations replace earlier ones.
    pub fn register<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |call| handler(call).boxed());
        self.handlers.insert(normalize_method(method), handler);
        self
    }

    /// Register a synchronous handler.
    pub fn register_sync<F>(self, method: &str, handler: F) -> Self
    where
        F: Fn(ApiCall) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.register(method, move |call| {
            let handler = handler.clone();
            async move { handler(call) }
        })
    }

    pub fn build(self) -> HostApi {
        HostApi {
            handlers: self.handlers,
        }
    }
}

/// Strip leading `_`/`$` and convert to snake_case.
pub fn normalize_method(method: &str) -> String {
    to_snake_case(method.trim_start_matches(['_', '$']))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api() -> HostApi {
        HostApi::builder()
            .register_sync("getCurrentPage", |call| {
                Ok(json!({"page": "today", "caller": call.plugin_id}))
            })
            .register("fail_always", |_call| async {
                Err::<Value, _>(anyhow::anyhow!("disk on fire"))
            })
            .build()
    }

    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("getCurrentPage"), "get_current_page");
        assert_eq!(normalize_method("_get_current_page"), "get_current_page");
        assert_eq!(normalize_method("$getCurrentPage"), "get_current_page");
    }

    #[tokio::test]
    async fn test_dispatch_by_any_spelling() {
        let api = api();
        let value = api
            .dispatch("demo", "$getCurrentPage", Value::Null)
            .await
            .unwrap();
        assert_eq!(value, json!({"page": "today", "caller": "demo"}));
        assert!(api.contains("get_current_page"));
    }

    #[tokio::test]
    async fn test_failures_become_remote_errors() {
        let api = api();
        let err = api.dispatch("demo", "failAlways", Value::Null).await.unwrap_err();
        assert_eq!(err.method.as_deref(), Some("fail_always"));
        assert_eq!(err.message, "disk on fire");

        let err = api.dispatch("demo", "nope", Value::Null).await.unwrap_err();
        assert_eq!(err.method.as_deref(), Some("nope"));

        let err = api.dispatch_payload("demo", &json!({"args": []})).await.unwrap_err();
        assert!(err.method.is_none());
    }
}
