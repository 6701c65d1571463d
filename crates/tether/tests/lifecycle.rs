mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use tether::{
    HostApi, InstanceEvent, IsolationMode, MemoryBridge, PluginDescriptor, PluginError,
    PluginInstance, PluginStatus, RegistryEvent,
};

use common::{eventually, registry, registry_with, wait_for_status};

fn same_context(id: &str, entry: &str) -> PluginDescriptor {
    PluginDescriptor::from_entry(id, entry).with_mode(IsolationMode::SameContext)
}

async fn loaded(registry: &tether::PluginRegistry, descriptor: PluginDescriptor) -> Arc<PluginInstance> {
    let id = descriptor.id.clone().unwrap();
    let reports = registry.register(vec![descriptor], false).await;
    assert_eq!(reports[0].status, PluginStatus::Loaded, "{:?}", reports[0].error);
    registry.ensure_plugin(&id).unwrap()
}

#[tokio::test]
async fn test_unload_survives_failing_before_unload() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(&registry, same_context("s", "stubborn")).await;

    instance.unload(false).await;
    assert_eq!(instance.status(), PluginStatus::Unloaded);
    assert!(instance.transport().is_none());

    instance.load().await.unwrap();
    assert_eq!(instance.status(), PluginStatus::Loaded);
    assert_eq!(instance.call_async("x", json!(1)).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_unload_is_noop_when_unloaded() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(&registry, same_context("a", "echo")).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    instance.subscribe(move |event| sink.lock().push(event.clone()));

    instance.unload(false).await;
    instance.unload(false).await;

    let unloaded = events
        .lock()
        .iter()
        .filter(|e| matches!(e, InstanceEvent::Unloaded))
        .count();
    assert_eq!(unloaded, 1);
}

#[tokio::test]
async fn test_load_is_noop_when_loaded() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(&registry, same_context("a", "echo")).await;
    let transport = instance.transport().unwrap();

    instance.load().await.unwrap();
    assert!(Arc::ptr_eq(&transport, &instance.transport().unwrap()));
}

#[tokio::test]
async fn test_reload_replaces_transport() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(&registry, same_context("a", "echo")).await;
    let before = instance.transport().unwrap();

    registry.reload(&["a".to_string()]).await;
    assert_eq!(instance.status(), PluginStatus::Loaded);
    let after = instance.transport().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(before.is_closed());
}

#[tokio::test]
async fn test_missing_guest_ends_in_error() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);

    let reports = registry
        .register(vec![same_context("ghost", "no-such-guest")], false)
        .await;
    assert_eq!(reports[0].status, PluginStatus::Error);

    let instance = registry.ensure_plugin("ghost").unwrap();
    assert!(instance.load_error().unwrap().contains("no-such-guest"));
    assert!(instance.transport().is_none());
}

#[tokio::test]
async fn test_disabled_flips_settle_on_last_value() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(&registry, same_context("a", "echo")).await;
    let settings = instance.settings().unwrap();

    settings.set_disabled(true);
    settings.set_disabled(false);
    settings.set_disabled(true);
    wait_for_status(&instance, PluginStatus::Unloaded).await;

    // Let any reconcile still in flight finish.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(instance.wait_settled().await, PluginStatus::Unloaded);

    settings.set_disabled(false);
    settings.set_disabled(true);
    settings.set_disabled(false);
    wait_for_status(&instance, PluginStatus::Loaded).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(instance.wait_settled().await, PluginStatus::Loaded);
}

#[tokio::test]
async fn test_settings_persisted_and_forwarded() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(&registry, same_context("a", "echo")).await;

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    registry.subscribe(move |event| {
        if let RegistryEvent::SettingsChanged { settings, .. } = event {
            sink.lock().push(settings.clone());
        }
    });

    instance.settings().unwrap().set("color", json!("red"));

    let key = instance.settings_key();
    eventually(|| bridge.settings(&key).is_some_and(|s| s["color"] == json!("red"))).await;
    assert_eq!(changes.lock().len(), 1);
    assert_eq!(changes.lock()[0]["color"], json!("red"));
}

#[tokio::test]
async fn test_guest_settings_update_merges() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(
        &registry,
        same_context("a", "asker").with_settings(json!({ "size": 3 })),
    )
    .await;

    instance.call_async("patch", json!({ "color": "blue" })).await.unwrap();

    let settings = instance.settings().unwrap().snapshot();
    assert_eq!(settings["color"], json!("blue"));
    assert_eq!(settings["size"], json!(3));
}

#[tokio::test]
async fn test_guest_invokes_host_api() {
    let host_api = HostApi::builder()
        .register_sync("get_current_page", |call| {
            Ok(json!({ "page": "home", "caller": call.plugin_id }))
        })
        .build();
    let bridge = MemoryBridge::new();
    let registry = registry_with(&bridge, host_api);
    let instance = loaded(&registry, same_context("a", "asker")).await;

    let page = instance
        .call_async("ask", json!({ "method": "get_current_page", "args": null }))
        .await
        .unwrap();
    assert_eq!(page, json!({ "page": "home", "caller": "a" }));

    let missing = instance
        .call_async("ask", json!({ "method": "nope", "args": null }))
        .await;
    assert!(matches!(missing, Err(PluginError::Transport(_))));

    // The channel is still usable after a failed call.
    let again = instance
        .call_async("ask", json!({ "method": "get_current_page", "args": null }))
        .await
        .unwrap();
    assert_eq!(again["page"], json!("home"));
}

#[tokio::test]
async fn test_same_context_guests_do_not_share_globals() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let a = loaded(&registry, same_context("a", "globals")).await;
    let b = loaded(&registry, same_context("b", "globals")).await;

    a.call_async("set", json!("mine")).await.unwrap();
    assert_eq!(a.call_async("get", Value::Null).await.unwrap(), json!("mine"));
    assert_eq!(b.call_async("get", Value::Null).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_calls_after_unload_fail() {
    let bridge = MemoryBridge::new();
    let registry = registry(&bridge);
    let instance = loaded(&registry, same_context("a", "echo")).await;
    instance.unload(false).await;

    let result = instance.call_async("echo", json!(1)).await;
    assert!(matches!(result, Err(PluginError::Lifecycle(_))));
}
