//! Plugin registry
//!
//! Owns every [`PluginInstance`] and is the control surface of the runtime.
//! Batch operations (`register`, `unregister`, `reload`, `shutdown`) are
//! serialised by an async mutex so they never interleave; inside a batch
//! descriptors are processed one at a time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use tether_protocol::{Hook, HookDomain, ThemeOptions};

use crate::context::HostContext;
use crate::descriptor::{normalize_location, PluginDescriptor};
use crate::error::{PluginError, PluginResult};
use crate::events::{EventBus, SubscriptionId};
use crate::gate::Gate;
use crate::instance::{PluginInfo, PluginInstance, PluginStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Registered(String),
    Unregistered(String),
    BeforeEnable(String),
    BeforeDisable(String),
    SettingsChanged { id: String, settings: Value },
    Error { id: String, message: String },
    /// A registration batch finished.
    Ready,
}

/// Persisted user preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemeOptions>,
    /// Package roots registered from outside the user plugin directory
    #[serde(default)]
    pub externals: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of one descriptor in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub id: String,
    pub name: String,
    pub elapsed: Duration,
    pub status: PluginStatus,
    pub error: Option<String>,
}

pub struct PluginRegistry {
    ctx: Arc<HostContext>,
    plugins: DashMap<String, Arc<PluginInstance>>,
    batch: tokio::sync::Mutex<()>,
    events: Arc<EventBus<RegistryEvent>>,
}

impl PluginRegistry {
    pub fn new(ctx: Arc<HostContext>) -> Self {
        Self {
            ctx,
            plugins: DashMap::new(),
            batch: tokio::sync::Mutex::new(()),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn context(&self) -> &Arc<HostContext> {
        &self.ctx
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batches
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a batch. With `initial`, remembered external packages not
    /// in `descriptors` are appended. Never fails as a whole; per-plugin
    /// outcomes are in the returned reports.
    pub async fn register(&self, descriptors: Vec<PluginDescriptor>, initial: bool) -> Vec<LoadReport> {
        let _batch = self.batch.lock().await;
        let _registering = self.ctx.begin_registering();
        let ready = Arc::new(Gate::new(false));

        let mut descriptors = descriptors;
        if initial {
            let prefs = self.load_preferences().await;
            let mut known: HashSet<String> = descriptors
                .iter()
                .filter_map(|d| d.url.as_deref().map(normalize_location))
                .collect();
            for url in &prefs.externals {
                if known.insert(normalize_location(url)) {
                    descriptors.push(PluginDescriptor::from_url(url));
                }
            }
        }
        let mut externals = Vec::new();

        info!(count = descriptors.len(), initial, "Registering plugins");
        let mut reports = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let started = Instant::now();
            let instance = PluginInstance::new(self.ctx.clone(), descriptor);
            let result = instance.load_with_ready(Some(ready.clone())).await;

            let report = LoadReport {
                id: instance.id(),
                name: instance.name(),
                elapsed: started.elapsed(),
                status: instance.status(),
                error: result.as_ref().err().map(ToString::to_string),
            };
            debug!(
                plugin = %report.id,
                status = ?report.status,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Load finished"
            );
            reports.push(report);

            if let Err(e) = &result {
                self.events.emit(&RegistryEvent::Error {
                    id: instance.id(),
                    message: e.to_string(),
                });
                if e.is_batch_recoverable() {
                    warn!(plugin = %instance.id(), error = %e, "Skipping plugin");
                    continue;
                }
                error!(plugin = %instance.id(), error = %e, "Plugin failed to load");
            }

            if let Some(url) = self.record(instance) {
                externals.push(url);
            }
        }

        // re-read: preferences may have been saved while the batch ran
        let mut prefs = self.load_preferences().await;
        for url in externals {
            let url = normalize_location(&url);
            if !prefs.externals.iter().any(|u| normalize_location(u) == url) {
                prefs.externals.push(url);
            }
        }
        self.save_preferences(&prefs).await;
        if let Some(theme) = prefs.theme.clone() {
            self.apply_theme(Some(theme));
        }

        ready.open();
        self.events.emit(&RegistryEvent::Ready);
        reports
    }

    /// Insert into the map and wire the settings listener. Returns the
    /// package root if the plugin is external.
    fn record(&self, instance: Arc<PluginInstance>) -> Option<String> {
        let id = instance.id();
        self.ctx.claim(&id, instance.serial());

        {
            let weak = Arc::downgrade(&instance);
            let events = self.events.clone();
            let plugin = id.clone();
            instance.watch_settings(move |change| {
                if let Some(transport) = weak.upgrade().and_then(|i| i.transport()) {
                    if let Err(e) = transport.send_settings(change.new.clone()) {
                        debug!(plugin = %plugin, error = %e, "Settings not forwarded");
                    }
                }
                events.emit(&RegistryEvent::SettingsChanged {
                    id: plugin.clone(),
                    settings: change.new.clone(),
                });
            });
        }

        let external = instance.is_external().then(|| instance.url()).flatten();
        self.plugins.insert(id.clone(), instance);
        self.events.emit(&RegistryEvent::Registered(id));
        external
    }

    /// Retire and drop each plugin. A retired instance never loads again,
    /// even if an enable was still queued when it was unregistered.
    pub async fn unregister(&self, ids: &[String]) {
        let _batch = self.batch.lock().await;
        let mut removed = Vec::new();

        for id in ids {
            let Some(instance) = self.get(id) else {
                warn!(plugin = %id, "Cannot unregister unknown plugin");
                continue;
            };

            instance.retire().await;
            self.plugins.remove(id);
            self.ctx.release(id, instance.serial());
            self.unregister_theme(id);
            removed.extend(instance.url().map(|u| normalize_location(&u)));

            info!(plugin = %id, "Plugin unregistered");
            self.events.emit(&RegistryEvent::Unregistered(id.clone()));
        }

        if removed.is_empty() {
            return;
        }
        let mut prefs = self.load_preferences().await;
        let before = prefs.externals.len();
        prefs
            .externals
            .retain(|u| !removed.contains(&normalize_location(u)));
        if prefs.externals.len() != before {
            self.save_preferences(&prefs).await;
        }
    }

    pub async fn reload(&self, ids: &[String]) {
        let _batch = self.batch.lock().await;
        for id in ids {
            match self.ensure_plugin(id) {
                Ok(instance) => {
                    if let Err(e) = instance.reload().await {
                        warn!(plugin = %id, error = %e, "Reload failed");
                    }
                }
                Err(e) => warn!(plugin = %id, error = %e, "Cannot reload"),
            }
        }
    }

    /// Unload every plugin without unregistering it.
    pub async fn shutdown(&self) {
        let _batch = self.batch.lock().await;
        let instances: Vec<_> = self.plugins.iter().map(|e| e.value().clone()).collect();
        info!(count = instances.len(), "Shutting down plugins");
        for instance in instances {
            instance.wait_settled().await;
            instance.unload(false).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Enable / disable
    // ─────────────────────────────────────────────────────────────────────────

    pub fn enable(&self, id: &str) -> PluginResult<()> {
        self.set_disabled(id, false)
    }

    pub fn disable(&self, id: &str) -> PluginResult<()> {
        self.set_disabled(id, true)
    }

    /// Flip the `disabled` setting; the instance reconciles on its own.
    fn set_disabled(&self, id: &str, disabled: bool) -> PluginResult<()> {
        let instance = self.ensure_plugin(id)?;
        if instance.is_pending() {
            debug!(plugin = %id, "Ignoring toggle while pending");
            return Ok(());
        }
        let settings = instance
            .settings()
            .ok_or_else(|| PluginError::lifecycle(format!("plugin '{id}' has no settings")))?;

        let event = if disabled {
            RegistryEvent::BeforeDisable(id.to_string())
        } else {
            RegistryEvent::BeforeEnable(id.to_string())
        };
        self.events.emit(&event);
        settings.set_disabled(disabled);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Arc<PluginInstance>> {
        self.plugins.get(id).map(|e| e.value().clone())
    }

    pub fn ensure_plugin(&self, id: &str) -> PluginResult<Arc<PluginInstance>> {
        self.get(id).ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        let mut list: Vec<_> = self.plugins.iter().map(|e| e.value().to_info()).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Hooks
    // ─────────────────────────────────────────────────────────────────────────

    pub fn hook_app(&self, event: &str, payload: Value, plugin: Option<&str>) {
        self.hook(HookDomain::App, event, payload, plugin)
    }

    pub fn hook_editor(&self, event: &str, payload: Value, plugin: Option<&str>) {
        self.hook(HookDomain::Editor, event, payload, plugin)
    }

    fn hook(&self, domain: HookDomain, event: &str, payload: Value, plugin: Option<&str>) {
        let hook = Hook::new(domain, event);
        let targets: Vec<_> = match plugin {
            Some(id) => self.get(id).into_iter().collect(),
            None => self.plugins.iter().map(|e| e.value().clone()).collect(),
        };

        for instance in targets {
            let Some(transport) = instance.transport() else {
                continue;
            };
            if let Err(e) = transport.call_hook(&hook, payload.clone()) {
                debug!(plugin = %instance.id(), hook = %hook, error = %e, "Hook not delivered");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Themes
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_theme(&self, id: &str, theme: ThemeOptions) {
        self.ctx.themes.register(id, theme);
    }

    pub fn unregister_theme(&self, id: &str) {
        if let Some(disposer) = self.ctx.themes.unregister(id) {
            disposer.dispose();
        }
    }

    /// Select a theme (or none). With `persist`, the choice is saved to
    /// user preferences.
    pub async fn select_theme(&self, theme: Option<ThemeOptions>, persist: bool) {
        self.apply_theme(theme.clone());
        if persist {
            let mut prefs = self.load_preferences().await;
            prefs.theme = theme;
            self.save_preferences(&prefs).await;
        }
    }

    fn apply_theme(&self, theme: Option<ThemeOptions>) {
        let bridge = self.ctx.bridge.clone();
        self.ctx
            .themes
            .select(theme, |t| bridge.inject_theme(t));
    }

    pub fn current_theme(&self) -> Option<ThemeOptions> {
        self.ctx.themes.current()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host
    // ─────────────────────────────────────────────────────────────────────────

    /// Release ready signals held back until the host finished mounting.
    pub fn host_mounted(&self) {
        info!("Host mounted");
        self.ctx.mark_host_mounted();
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Preferences
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn load_preferences(&self) -> UserPreferences {
        match self.ctx.bridge.load_user_preferences().await {
            Ok(Value::Null) => UserPreferences::default(),
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed user preferences");
                UserPreferences::default()
            }),
            Err(e) => {
                warn!(error = %e, "Failed to load user preferences");
                UserPreferences::default()
            }
        }
    }

    async fn save_preferences(&self, prefs: &UserPreferences) {
        let value = match serde_json::to_value(prefs) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Failed to encode user preferences");
                return;
            }
        };
        if let Err(e) = self.ctx.bridge.save_user_preferences(&value).await {
            error!(error = %e, "Failed to save user preferences");
        }
    }
}
