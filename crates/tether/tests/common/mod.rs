//! Shared fixtures: in-process guests, a duplex launcher and a context
//! builder over `MemoryBridge`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::DuplexStream;

use tether::{
    GuestCatalog, HostApi, HostContext, LaunchRequest, Launcher, MemoryBridge, PluginInstance,
    PluginRegistry, PluginStatus, RemoteConnection, RuntimeConfig, TransportError,
};
use tether_guest::protocol::{frame::spawn_io, Hook};
use tether_guest::{Guest, GuestContext, GuestError, GuestResult, GuestRuntime};

// ─────────────────────────────────────────────────────────────────────────────
// Guests
// ─────────────────────────────────────────────────────────────────────────────

/// Echoes payloads; `fail` errors; `hooks` lists hooks seen so far.
pub struct Echo;

#[async_trait]
impl Guest for Echo {
    async fn on_call(&self, ctx: &GuestContext, ty: &str, payload: Value) -> GuestResult<Value> {
        match ty {
            "echo" => Ok(payload),
            "fail" => Err(GuestError::handler("nope")),
            "hooks" => Ok(ctx.namespace().get("hooks").unwrap_or_else(|| json!([]))),
            other => Err(GuestError::UnknownCall(other.to_string())),
        }
    }

    async fn on_hook(&self, ctx: &GuestContext, hook: &Hook, _payload: Value) -> GuestResult<()> {
        let mut seen = ctx.namespace().get("hooks").unwrap_or_else(|| json!([]));
        if let Value::Array(items) = &mut seen {
            items.push(Value::String(hook.to_string()));
        }
        ctx.namespace().set("hooks", seen);
        Ok(())
    }
}

/// Refuses to shut down cleanly.
pub struct Stubborn;

#[async_trait]
impl Guest for Stubborn {
    async fn on_call(&self, _ctx: &GuestContext, _ty: &str, payload: Value) -> GuestResult<Value> {
        Ok(payload)
    }

    async fn before_unload(&self, _ctx: &GuestContext, _unregister: bool) -> GuestResult<()> {
        Err(GuestError::handler("cleanup exploded"))
    }
}

/// Reads and writes its own globals.
pub struct Globals;

#[async_trait]
impl Guest for Globals {
    async fn on_call(&self, ctx: &GuestContext, ty: &str, payload: Value) -> GuestResult<Value> {
        match ty {
            "set" => {
                ctx.namespace().set("value", payload);
                Ok(Value::Null)
            }
            "get" => Ok(ctx.namespace().get("value").unwrap_or(Value::Null)),
            other => Err(GuestError::UnknownCall(other.to_string())),
        }
    }
}

/// Calls back into the host.
pub struct Asker;

#[async_trait]
impl Guest for Asker {
    async fn on_call(&self, ctx: &GuestContext, ty: &str, payload: Value) -> GuestResult<Value> {
        match ty {
            "ask" => {
                let method = payload["method"].as_str().unwrap_or_default().to_string();
                ctx.invoke(&method, payload["args"].clone()).await
            }
            "patch" => {
                ctx.update_settings(payload)?;
                Ok(Value::Null)
            }
            other => Err(GuestError::UnknownCall(other.to_string())),
        }
    }
}

/// Takes a while to initialize.
pub struct Sleepy;

#[async_trait]
impl Guest for Sleepy {
    async fn init(&self, _ctx: &GuestContext) -> GuestResult<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn on_call(&self, _ctx: &GuestContext, _ty: &str, payload: Value) -> GuestResult<Value> {
        Ok(payload)
    }
}

pub fn catalog() -> GuestCatalog {
    GuestCatalog::new()
        .with("echo", || Echo)
        .with("stubborn", || Stubborn)
        .with("globals", || Globals)
        .with("asker", || Asker)
        .with("sleepy", || Sleepy)
}

// ─────────────────────────────────────────────────────────────────────────────
// Launchers
// ─────────────────────────────────────────────────────────────────────────────

/// Serves catalog guests over an in-memory byte pipe, framed exactly like
/// a child process's stdio.
pub struct DuplexLauncher {
    catalog: GuestCatalog,
}

impl DuplexLauncher {
    pub fn new() -> Self {
        Self { catalog: catalog() }
    }
}

#[async_trait]
impl Launcher for DuplexLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<RemoteConnection, TransportError> {
        let guest = self
            .catalog
            .create(&request.entry)
            .ok_or_else(|| TransportError::Launch(format!("no guest for {}", request.entry)))?;

        let (host_end, guest_end) = tokio::io::duplex(64 * 1024);
        let (guest_read, guest_write) = tokio::io::split(guest_end);
        let (tx, rx, _io) = spawn_io(request.plugin_id.clone(), guest_read, guest_write);
        tokio::spawn(GuestRuntime::from_arc(guest).run(rx, tx));

        let (reader, writer) = tokio::io::split(host_end);
        Ok(RemoteConnection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        })
    }
}

/// Accepts the connection and never answers.
#[derive(Default)]
pub struct MuteLauncher {
    held: Mutex<Vec<DuplexStream>>,
}

#[async_trait]
impl Launcher for MuteLauncher {
    async fn launch(&self, _request: &LaunchRequest) -> Result<RemoteConnection, TransportError> {
        let (host_end, guest_end) = tokio::io::duplex(64 * 1024);
        self.held.lock().push(guest_end);
        let (reader, writer) = tokio::io::split(host_end);
        Ok(RemoteConnection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup
// ─────────────────────────────────────────────────────────────────────────────

pub const ROOT: &str = "/srv/tether";

pub fn config() -> RuntimeConfig {
    RuntimeConfig::in_dir(ROOT)
}

pub fn registry(bridge: &MemoryBridge) -> PluginRegistry {
    registry_with(bridge, HostApi::default())
}

pub fn registry_with(bridge: &MemoryBridge, host_api: HostApi) -> PluginRegistry {
    let ctx: Arc<HostContext> = HostContext::builder(config())
        .with_bridge(bridge.clone())
        .with_catalog(catalog())
        .with_launcher(DuplexLauncher::new())
        .with_host_api(host_api)
        .build();
    let registry = PluginRegistry::new(ctx);
    registry.host_mounted();
    registry
}

/// Poll until `instance` settles in `expected`.
pub async fn wait_for_status(instance: &PluginInstance, expected: PluginStatus) {
    let poll = async {
        loop {
            if instance.wait_settled().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), poll).await.is_err() {
        panic!(
            "plugin {} never settled in {:?}, last status {:?}",
            instance.id(),
            expected,
            instance.status()
        );
    }
}

/// Poll until `check` holds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("condition never held");
}
