//! Plugin instance lifecycle
//!
//! ```text
//! Unloaded ──load──▶ Loading ──▶ Loaded ──unload──▶ Unloading ──▶ Unloaded
//!                       │
//!                       └──────▶ Error
//! ```
//!
//! `Loading` and `Unloading` are the pending states; every lifecycle
//! operation is a no-op while pending. A transition always ends in a
//! terminal state, even if the future driving it is dropped.
//!
//! Enabling and disabling work through the settings store: flipping
//! `disabled` persists the change and schedules a reconcile, which runs
//! whichever of `load`/`unload` brings the status in line with the flag.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tether_protocol::{BaseInfo, IsolationMode, ThemeOptions, PROVIDER_THEME, SETTINGS_UPDATE};

use crate::backend::{self, LaunchRequest, LaunchSpec};
use crate::context::HostContext;
use crate::descriptor::{PackageConfig, PluginDescriptor, PACKAGE_SECTION};
use crate::error::{PluginError, PluginResult};
use crate::events::{EventBus, SubscriptionId};
use crate::gate::Gate;
use crate::logger::PluginLogger;
use crate::settings::{SettingsChange, SettingsStore};
use crate::transport::{Transport, TransportEvent};

/// Setting that overrides the entry resource during development.
pub const DEV_ENTRY_KEY: &str = "_devEntry";

/// Script host binary looked up next to the host when none is configured.
pub const SCRIPT_HOST: &str = "tether-script-host";

const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "py"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Error,
}

impl PluginStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, PluginStatus::Loading | PluginStatus::Unloading)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstanceEvent {
    Loaded,
    Unloaded,
    BeforeUnload { unregister: bool },
    Error(String),
    BeforeReload,
    Reloaded,
    /// A guest call with no built-in handling.
    GuestCall { ty: String, payload: Value },
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub mode: IsolationMode,
    pub status: PluginStatus,
    pub error: Option<String>,
    pub url: Option<String>,
    pub settings_path: Option<PathBuf>,
    pub external: bool,
    pub disabled: bool,
}

type Disposer = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub struct PluginInstance {
    serial: u64,
    this: Weak<PluginInstance>,
    ctx: Arc<HostContext>,
    id: RwLock<String>,
    descriptor: RwLock<PluginDescriptor>,
    status: watch::Sender<PluginStatus>,
    load_error: RwLock<Option<String>>,
    settings: OnceLock<Arc<SettingsStore>>,
    logger: PluginLogger,
    transport: RwLock<Option<Arc<Transport>>>,
    disposers: Mutex<Vec<Disposer>>,
    events: EventBus<InstanceEvent>,
    transport_events: Arc<EventBus<TransportEvent>>,
    /// Set once the registry drops the instance; no load may start after it.
    retired: AtomicBool,
    settings_listeners: Mutex<Vec<SubscriptionId>>,
}

/// Holds a pending status; dropping it unfinished leaves `fallback`.
struct Transition<'a> {
    status: &'a watch::Sender<PluginStatus>,
    fallback: PluginStatus,
    done: bool,
}

impl Transition<'_> {
    fn finish(mut self, status: PluginStatus) {
        self.done = true;
        self.status.send_replace(status);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.status.send_replace(self.fallback);
        }
    }
}

impl PluginInstance {
    pub fn new(ctx: Arc<HostContext>, descriptor: PluginDescriptor) -> Arc<Self> {
        let id = descriptor
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_id);
        let serial = ctx.next_serial();
        let (status, _) = watch::channel(PluginStatus::Unloaded);

        Arc::new_cyclic(|this: &Weak<Self>| {
            let transport_events = Arc::new(EventBus::new());
            let weak = this.clone();
            transport_events.subscribe(move |event: &TransportEvent| {
                if let Some(instance) = weak.upgrade() {
                    instance.on_transport_event(event);
                }
            });

            Self {
                serial,
                this: this.clone(),
                ctx,
                logger: PluginLogger::new(id.clone()),
                id: RwLock::new(id),
                descriptor: RwLock::new(descriptor),
                status,
                load_error: RwLock::new(None),
                settings: OnceLock::new(),
                transport: RwLock::new(None),
                disposers: Mutex::new(Vec::new()),
                events: EventBus::new(),
                transport_events,
                retired: AtomicBool::new(false),
                settings_listeners: Mutex::new(Vec::new()),
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> String {
        self.id.read().clone()
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub fn name(&self) -> String {
        self.descriptor.read().name.clone().unwrap_or_else(|| self.id())
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        self.descriptor.read().clone()
    }

    pub fn url(&self) -> Option<String> {
        self.descriptor.read().url.clone()
    }

    pub fn status(&self) -> PluginStatus {
        *self.status.borrow()
    }

    pub fn is_pending(&self) -> bool {
        self.status().is_pending()
    }

    /// Unregistered; the instance will not load again.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub fn load_error(&self) -> Option<String> {
        self.load_error.read().clone()
    }

    pub fn settings(&self) -> Option<Arc<SettingsStore>> {
        self.settings.get().cloned()
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.read().clone()
    }

    pub fn is_installed_in_user_root(&self) -> bool {
        self.url().is_some_and(|url| self.ctx.is_user_root(&url))
    }

    /// Package lives outside the user plugin directory.
    pub fn is_external(&self) -> bool {
        self.url().is_some() && !self.is_installed_in_user_root()
    }

    /// Settings file key: sanitised name plus id.
    pub fn settings_key(&self) -> String {
        let name: String = self
            .name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_{}", name.to_lowercase(), self.id())
    }

    pub fn base_info(&self) -> BaseInfo {
        let descriptor = self.descriptor.read();
        BaseInfo {
            id: self.id(),
            name: descriptor.name.clone().unwrap_or_else(|| self.id()),
            version: descriptor.version.clone().unwrap_or_default(),
            mode: descriptor.mode,
            settings: self
                .settings
                .get()
                .map(|s| s.snapshot())
                .unwrap_or_else(|| json!({})),
        }
    }

    pub fn to_info(&self) -> PluginInfo {
        let descriptor = self.descriptor();
        let settings = self.settings();
        PluginInfo {
            id: self.id(),
            name: self.name(),
            version: descriptor.version,
            mode: descriptor.mode,
            status: self.status(),
            error: self.load_error(),
            url: descriptor.url,
            settings_path: settings.as_ref().and_then(|s| s.path().map(PathBuf::from)),
            external: self.is_external(),
            disabled: settings.is_some_and(|s| s.disabled()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&InstanceEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls into the guest
    // ─────────────────────────────────────────────────────────────────────────

    fn require_transport(&self) -> PluginResult<Arc<Transport>> {
        self.transport()
            .ok_or_else(|| PluginError::lifecycle(format!("plugin '{}' is not loaded", self.id())))
    }

    pub fn call(&self, ty: &str, payload: Value) -> PluginResult<()> {
        Ok(self.require_transport()?.call(ty, payload)?)
    }

    pub async fn call_async(&self, ty: &str, payload: Value) -> PluginResult<Value> {
        let transport = self.require_transport()?;
        Ok(transport.call_async(ty, payload).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    fn begin(
        &self,
        target: PluginStatus,
        fallback: PluginStatus,
        allowed: impl Fn(PluginStatus) -> bool,
    ) -> Option<Transition<'_>> {
        let started = self.status.send_if_modified(|status| {
            if status.is_pending() || !allowed(*status) {
                return false;
            }
            if target == PluginStatus::Loading && self.is_retired() {
                return false;
            }
            *status = target;
            true
        });
        started.then_some(Transition {
            status: &self.status,
            fallback,
            done: false,
        })
    }

    /// Wait until no transition is running and return the status.
    pub async fn wait_settled(&self) -> PluginStatus {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|status| !status.is_pending()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    pub async fn load(&self) -> PluginResult<()> {
        self.load_with_ready(None).await
    }

    /// Load, deferring the ready signal until `batch` opens (and the host
    /// is mounted).
    pub(crate) async fn load_with_ready(&self, batch: Option<Arc<Gate>>) -> PluginResult<()> {
        let Some(transition) = self.begin(PluginStatus::Loading, PluginStatus::Error, |s| {
            s != PluginStatus::Loaded
        }) else {
            if self.is_retired() {
                return Err(PluginError::lifecycle(format!(
                    "plugin '{}' was unregistered",
                    self.id()
                )));
            }
            debug!(plugin = %self.id(), status = ?self.status(), "Load skipped");
            return Ok(());
        };
        *self.load_error.write() = None;

        match self.do_load(batch).await {
            Ok(status) => {
                transition.finish(status);
                if status == PluginStatus::Loaded {
                    info!(plugin = %self.id(), "Plugin loaded");
                    self.events.emit(&InstanceEvent::Loaded);
                }
                Ok(())
            }
            Err(e) => {
                self.run_disposers().await;
                let message = e.to_string();
                *self.load_error.write() = Some(message.clone());
                transition.finish(PluginStatus::Error);
                self.logger.error(format!("load failed: {message}"));
                self.events.emit(&InstanceEvent::Error(message));
                Err(e)
            }
        }
    }

    async fn do_load(&self, batch: Option<Arc<Gate>>) -> PluginResult<PluginStatus> {
        if self.descriptor.read().entry.is_none() {
            self.prepare_package().await?;
        }

        let id = self.id();
        if self.ctx.is_duplicate(&id, self.serial) {
            return Err(PluginError::Duplicate(id));
        }

        let settings = match self.settings.get() {
            Some(settings) => settings.clone(),
            None => self.init_settings().await,
        };
        let disabled = settings.disabled();
        if disabled {
            debug!(plugin = %id, "Plugin is disabled");
            return Ok(PluginStatus::Unloaded);
        }

        self.install_themes();

        let entry = self.descriptor.read().entry.clone();
        let Some(entry) = entry else {
            return Ok(PluginStatus::Loaded);
        };
        let entry = self.normalize_entry(entry, &settings).await?;

        let (mode, root) = {
            let descriptor = self.descriptor.read();
            (descriptor.mode, descriptor.url.clone())
        };
        let request = LaunchRequest {
            plugin_id: id,
            entry,
            root: root.map(PathBuf::from),
        };
        let transport = Transport::connect(
            self.base_info(),
            backend::create(&self.ctx, mode, request),
            self.ctx.transport_options(),
            self.ctx.host_api.clone(),
            self.logger.clone(),
            self.transport_events.clone(),
        )
        .await?;

        *self.transport.write() = Some(transport.clone());
        self.spawn_ready(transport.clone(), batch);

        let this = self.this.clone();
        self.push_disposer(move || {
            Box::pin(async move {
                transport.destroy().await;
                if let Some(instance) = this.upgrade() {
                    instance.transport.write().take();
                }
                Ok(())
            })
        });

        Ok(PluginStatus::Loaded)
    }

    /// Read `package.json`, copy the allow-listed fields and settle the id.
    async fn prepare_package(&self) -> PluginResult<()> {
        let url = self
            .url()
            .ok_or_else(|| PluginError::descriptor("", "no entry and no package location"))?;

        let text = self
            .ctx
            .bridge
            .load_plugin_config(&url)
            .await
            .map_err(|e| PluginError::descriptor(&url, e))?;
        let mut raw: Value =
            serde_json::from_str(&text).map_err(|e| PluginError::descriptor(&url, e))?;
        let pkg = PackageConfig::parse(&raw).map_err(|e| PluginError::descriptor(&url, e))?;
        if !pkg.is_loadable() {
            return Err(PluginError::descriptor(&url, "no main entry or themes declared"));
        }

        let declared = self.descriptor.write().apply_package(&url, &pkg);
        match declared {
            Some(id) => self.set_id(id),
            None => {
                let id = self.id();
                if let Value::Object(map) = &mut raw {
                    let section = map
                        .entry(PACKAGE_SECTION)
                        .or_insert_with(|| Value::Object(Default::default()));
                    if let Value::Object(section) = section {
                        section.insert("id".to_string(), Value::String(id.clone()));
                    }
                }
                if let Err(e) = self.ctx.bridge.save_plugin_config(&url, &raw).await {
                    debug!(plugin = %id, error = %e, "Could not save generated id");
                }
            }
        }
        Ok(())
    }

    fn set_id(&self, id: String) {
        self.logger.retag(id.clone());
        self.descriptor.write().id = Some(id.clone());
        *self.id.write() = id;
    }

    async fn init_settings(&self) -> Arc<SettingsStore> {
        let key = self.settings_key();
        let preset = self.descriptor.read().settings.clone();

        let (path, persisted) = match self.ctx.bridge.load_plugin_user_settings(&key).await {
            Ok((path, value)) => (Some(path), value),
            Err(e) => {
                warn!(plugin = %self.id(), error = %e, "Failed to load settings");
                (None, Value::Null)
            }
        };
        let has_persisted = persisted.as_object().is_some_and(|map| !map.is_empty());
        let initial = match preset {
            Some(preset) if !has_persisted => preset,
            _ => persisted,
        };

        let store = Arc::new(SettingsStore::new(path, initial));
        let (tx, rx) = mpsc::unbounded_channel::<SettingsChange>();
        let listener = store.on_change(move |change| {
            let _ = tx.send(change.clone());
        });
        self.settings_listeners.lock().push(listener);
        // ends once every listener holding `tx` is detached
        tokio::spawn(settings_worker(self.this.clone(), key, rx));

        let _ = self.settings.set(store.clone());
        store
    }

    fn install_themes(&self) {
        let id = self.id();
        let themes = self.descriptor.read().themes.clone();
        for theme in themes {
            self.ctx.themes.register(&id, theme);
        }

        let ctx = self.ctx.clone();
        self.push_disposer(move || {
            Box::pin(async move {
                if let Some(disposer) = ctx.themes.unregister(&id) {
                    disposer.dispose();
                }
                Ok(())
            })
        });
    }

    /// Apply `_devEntry` and wrap script entries of remote plugins in a
    /// launch document.
    async fn normalize_entry(&self, entry: String, settings: &SettingsStore) -> PluginResult<String> {
        let entry = settings
            .get(DEV_ENTRY_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|dev| !dev.is_empty())
            .unwrap_or(entry);

        let (mode, root) = {
            let descriptor = self.descriptor.read();
            (descriptor.mode, descriptor.url.clone())
        };
        if mode != IsolationMode::Remote || !is_script(&entry) {
            return Ok(entry);
        }

        let program = self
            .ctx
            .config
            .script_host
            .clone()
            .unwrap_or_else(|| self.ctx.bridge.app_path().join(SCRIPT_HOST));
        let mut spec = LaunchSpec::new(program).with_args(vec![entry]);
        if let Some(root) = root {
            spec = spec.with_cwd(root);
        }
        let text = spec.to_toml().map_err(PluginError::lifecycle)?;
        let path = self
            .ctx
            .bridge
            .write_user_tmp_file(&format!("{}_launch.toml", self.id()), &text)
            .await?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn spawn_ready(&self, transport: Arc<Transport>, batch: Option<Arc<Gate>>) {
        let ctx = self.ctx.clone();
        let this = self.this.clone();
        tokio::spawn(async move {
            if let Some(batch) = batch {
                batch.wait().await;
            }
            ctx.wait_host_mounted().await;
            if transport.is_closed() {
                return;
            }
            let Some(instance) = this.upgrade() else {
                return;
            };
            if let Err(e) = transport.signal_ready(instance.base_info()) {
                debug!(plugin = %instance.id(), error = %e, "Ready signal not delivered");
            }
        });
    }

    pub(crate) fn push_disposer<F>(&self, disposer: F)
    where
        F: FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static,
    {
        self.disposers.lock().push(Box::new(disposer));
    }

    async fn run_disposers(&self) {
        let disposers = std::mem::take(&mut *self.disposers.lock());
        for dispose in disposers {
            if let Err(e) = dispose().await {
                warn!(plugin = %self.id(), error = %e, "Disposer failed");
            }
        }
    }

    /// Unload. With `unregister`, files of a user-root install are removed
    /// afterwards.
    pub async fn unload(&self, unregister: bool) {
        if self.is_pending() {
            return;
        }
        self.teardown(unregister).await;
        if unregister {
            self.remove_installed_files().await;
        }
    }

    async fn remove_installed_files(&self) {
        if !self.is_installed_in_user_root() {
            return;
        }
        if let Some(url) = self.url() {
            debug!(plugin = %self.id(), root = %url, "Removing installed files");
            if let Err(e) = self.ctx.bridge.remove_plugin_files(Path::new(&url)).await {
                warn!(plugin = %self.id(), error = %e, "Failed to remove plugin files");
            }
        }
    }

    /// Listen to settings changes until the instance is retired.
    pub(crate) fn watch_settings<F>(&self, listener: F)
    where
        F: Fn(&SettingsChange) + Send + Sync + 'static,
    {
        if let Some(settings) = self.settings.get() {
            let id = settings.on_change(listener);
            self.settings_listeners.lock().push(id);
        }
    }

    /// Take the instance out of service for good: block further loads,
    /// detach every settings listener, then unload with `unregister`.
    pub(crate) async fn retire(&self) {
        // flip under the status lock so no load can begin past this point
        self.status.send_if_modified(|_| {
            self.retired.store(true, Ordering::SeqCst);
            false
        });

        let listeners = std::mem::take(&mut *self.settings_listeners.lock());
        if let Some(settings) = self.settings.get() {
            for id in listeners {
                settings.off_change(id);
            }
        }

        self.wait_settled().await;
        self.teardown(true).await;
        // a reconcile already unloading may have held the transition
        self.wait_settled().await;
        self.remove_installed_files().await;
        debug!(plugin = %self.id(), "Plugin retired");
    }

    async fn teardown(&self, unregister: bool) {
        let Some(transition) = self.begin(PluginStatus::Unloading, PluginStatus::Unloaded, |s| {
            s != PluginStatus::Unloaded
        }) else {
            return;
        };
        self.events.emit(&InstanceEvent::BeforeUnload { unregister });

        let transport = self.transport();
        if let Some(transport) = transport {
            if let Err(e) = transport.before_unload(unregister).await {
                warn!(plugin = %self.id(), error = %e, "before-unload failed");
                self.logger.warn(format!("before-unload failed: {e}"));
            }
        }

        self.run_disposers().await;
        self.transport.write().take();

        transition.finish(PluginStatus::Unloaded);
        info!(plugin = %self.id(), "Plugin unloaded");
        self.events.emit(&InstanceEvent::Unloaded);
    }

    pub async fn reload(&self) -> PluginResult<()> {
        if self.is_pending() {
            return Ok(());
        }
        self.events.emit(&InstanceEvent::BeforeReload);
        self.unload(false).await;
        let result = self.load().await;
        self.events.emit(&InstanceEvent::Reloaded);
        result
    }

    /// Run `load`/`unload` until the status matches the `disabled` flag.
    pub async fn reconcile(&self) {
        let mut first = true;
        loop {
            let status = self.wait_settled().await;
            if self.is_retired() {
                return;
            }
            let Some(settings) = self.settings() else {
                return;
            };
            let disabled = settings.disabled();

            if disabled && status == PluginStatus::Loaded {
                self.unload(false).await;
            } else if !disabled
                && (status == PluginStatus::Unloaded || (first && status == PluginStatus::Error))
            {
                let _ = self.load().await;
            } else {
                return;
            }
            first = false;
        }
    }

    fn spawn_reconcile(self: Arc<Self>) {
        tokio::spawn(async move { self.reconcile().await });
    }

    fn on_transport_event(&self, event: &TransportEvent) {
        let TransportEvent::Inbound { ty, payload } = event else {
            return;
        };
        match ty.as_str() {
            SETTINGS_UPDATE => {
                if let Some(settings) = self.settings.get() {
                    settings.merge(payload.clone());
                }
            }
            PROVIDER_THEME => match serde_json::from_value::<ThemeOptions>(payload.clone()) {
                Ok(theme) => self.ctx.themes.register(&self.id(), theme),
                Err(e) => warn!(plugin = %self.id(), error = %e, "Invalid theme from guest"),
            },
            _ => self.events.emit(&InstanceEvent::GuestCall {
                ty: ty.clone(),
                payload: payload.clone(),
            }),
        }
    }
}

/// Persist every settings change; a `disabled` flip schedules a reconcile.
async fn settings_worker(
    this: Weak<PluginInstance>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<SettingsChange>,
) {
    while let Some(change) = rx.recv().await {
        let Some(instance) = this.upgrade() else {
            break;
        };
        if let Err(e) = instance
            .ctx
            .bridge
            .save_plugin_user_settings(&key, &change.new)
            .await
        {
            warn!(plugin = %instance.id(), error = %e, "Failed to save settings");
        }
        if let Some(disabled) = change.disabled_flip() {
            debug!(plugin = %instance.id(), disabled, "Disabled flag changed");
            instance.spawn_reconcile();
        }
    }
}

fn is_script(entry: &str) -> bool {
    Path::new(entry)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MemoryBridge;
    use crate::config::RuntimeConfig;

    fn ctx(bridge: MemoryBridge) -> Arc<HostContext> {
        HostContext::builder(RuntimeConfig::in_dir("/srv/tether"))
            .with_bridge(bridge)
            .build()
    }

    #[test]
    fn test_pending_states() {
        assert!(PluginStatus::Loading.is_pending());
        assert!(PluginStatus::Unloading.is_pending());
        assert!(!PluginStatus::Loaded.is_pending());
        assert!(!PluginStatus::Error.is_pending());
    }

    #[test]
    fn test_script_detection() {
        assert!(is_script("/p/index.js"));
        assert!(is_script("main.py"));
        assert!(!is_script("/p/bin/guest"));
        assert!(!is_script("launch.toml"));
    }

    #[tokio::test]
    async fn test_settings_key_sanitised() {
        let instance = PluginInstance::new(
            ctx(MemoryBridge::new()),
            PluginDescriptor::from_entry("abc", "x").with_name("Hello World!"),
        );
        assert_eq!(instance.settings_key(), "hello_world__abc");
    }

    #[tokio::test]
    async fn test_missing_package_is_descriptor_error() {
        let instance = PluginInstance::new(
            ctx(MemoryBridge::new()),
            PluginDescriptor::from_url("/nowhere"),
        );
        let err = instance.load().await.unwrap_err();
        assert!(matches!(err, PluginError::Descriptor { .. }));
        assert_eq!(instance.status(), PluginStatus::Error);
        assert!(instance.load_error().is_some());
    }

    #[tokio::test]
    async fn test_theme_only_package_generates_id() {
        let bridge = MemoryBridge::new().with_package(
            "/srv/tether/plugins/dusk",
            json!({"name": "dusk", "tether": {"themes": [{"name": "Dusk", "url": "dusk.css"}]}}),
        );
        let ctx = ctx(bridge.clone());
        let instance = PluginInstance::new(ctx.clone(), PluginDescriptor::from_url("/srv/tether/plugins/dusk"));

        instance.load().await.unwrap();
        assert_eq!(instance.status(), PluginStatus::Loaded);
        assert!(instance.transport().is_none());

        let saved = bridge.package("/srv/tether/plugins/dusk").unwrap();
        assert_eq!(saved["tether"]["id"], json!(instance.id()));

        let themes = ctx.themes.themes_of(&instance.id());
        assert_eq!(themes.len(), 1);
        assert_eq!(themes[0].url, "/srv/tether/plugins/dusk/dusk.css");

        instance.unload(false).await;
        assert_eq!(instance.status(), PluginStatus::Unloaded);
        assert!(ctx.themes.themes_of(&instance.id()).is_empty());
    }
}
