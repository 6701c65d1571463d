//! Host context
//!
//! Shared, immutable-after-construction state handed to every plugin
//! instance: configuration, host collaborators, the theme manager and the
//! "host mounted" gate. Built once at startup and passed down explicitly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{Launcher, ProcessLauncher};
use crate::bridge::{FsBridge, HostBridge};
use crate::catalog::GuestCatalog;
use crate::config::RuntimeConfig;
use crate::gate::Gate;
use crate::host_api::HostApi;
use crate::theme::ThemeManager;
use crate::transport::TransportOptions;

pub struct HostContext {
    pub config: RuntimeConfig,
    pub bridge: Arc<dyn HostBridge>,
    pub host_api: Arc<HostApi>,
    pub catalog: Arc<GuestCatalog>,
    pub launcher: Arc<dyn Launcher>,
    pub themes: ThemeManager,
    host_mounted: Gate,
    registering: AtomicBool,
    /// id → serial of the instance recorded under it
    claims: RwLock<HashMap<String, u64>>,
    next_serial: AtomicU64,
}

impl HostContext {
    pub fn builder(config: RuntimeConfig) -> HostContextBuilder {
        HostContextBuilder {
            config,
            bridge: None,
            host_api: None,
            catalog: None,
            launcher: None,
        }
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            call_timeout: self.config.call_timeout(),
            sweep_interval: self.config.sweep_interval(),
            high_water: self.config.sweep_high_water,
        }
    }

    /// Whether a package root lives under the user plugin directory.
    pub fn is_user_root(&self, url: &str) -> bool {
        Path::new(url).starts_with(&self.config.user_plugins_root)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host mounted
    // ─────────────────────────────────────────────────────────────────────────

    pub fn mark_host_mounted(&self) {
        self.host_mounted.open();
    }

    pub fn is_host_mounted(&self) -> bool {
        self.host_mounted.is_open()
    }

    pub async fn wait_host_mounted(&self) {
        self.host_mounted.wait().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn next_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Flag a registration batch as running until the guard drops.
    pub(crate) fn begin_registering(&self) -> RegisteringGuard<'_> {
        self.registering.store(true, Ordering::SeqCst);
        RegisteringGuard { ctx: self }
    }

    pub fn is_registering(&self) -> bool {
        self.registering.load(Ordering::SeqCst)
    }

    pub(crate) fn claim(&self, id: &str, serial: u64) {
        self.claims.write().insert(id.to_string(), serial);
    }

    pub(crate) fn release(&self, id: &str, serial: u64) {
        let mut claims = self.claims.write();
        if claims.get(id) == Some(&serial) {
            claims.remove(id);
        }
    }

    /// True when a batch is running and another instance already holds `id`.
    pub(crate) fn is_duplicate(&self, id: &str, serial: u64) -> bool {
        self.is_registering()
            && self
                .claims
                .read()
                .get(id)
                .is_some_and(|owner| *owner != serial)
    }
}

pub(crate) struct RegisteringGuard<'a> {
    ctx: &'a HostContext,
}

impl Drop for RegisteringGuard<'_> {
    fn drop(&mut self) {
        self.ctx.registering.store(false, Ordering::SeqCst);
    }
}

pub struct HostContextBuilder {
    config: RuntimeConfig,
    bridge: Option<Arc<dyn HostBridge>>,
    host_api: Option<HostApi>,
    catalog: Option<GuestCatalog>,
    launcher: Option<Arc<dyn Launcher>>,
}

impl HostContextBuilder {
    pub fn with_bridge(mut self, bridge: impl HostBridge + 'static) -> Self {
        self.bridge = Some(Arc::new(bridge));
        self
    }

    pub fn with_host_api(mut self, host_api: HostApi) -> Self {
        self.host_api = Some(host_api);
        self
    }

    pub fn with_catalog(mut self, catalog: GuestCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_launcher(mut self, launcher: impl Launcher + 'static) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    pub fn build(self) -> Arc<HostContext> {
        let bridge = self
            .bridge
            .unwrap_or_else(|| Arc::new(FsBridge::new(self.config.data_dir.clone())));
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(ProcessLauncher::new()));

        Arc::new(HostContext {
            config: self.config,
            bridge,
            host_api: Arc::new(self.host_api.unwrap_or_default()),
            catalog: Arc::new(self.catalog.unwrap_or_default()),
            launcher,
            themes: ThemeManager::new(),
            host_mounted: Gate::new(false),
            registering: AtomicBool::new(false),
            claims: RwLock::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MemoryBridge;

    #[test]
    fn test_duplicate_only_while_registering() {
        let ctx = HostContext::builder(RuntimeConfig::default())
            .with_bridge(MemoryBridge::new())
            .build();
        ctx.claim("a", 1);
        assert!(!ctx.is_duplicate("a", 2));

        {
            let _guard = ctx.begin_registering();
            assert!(ctx.is_duplicate("a", 2));
            assert!(!ctx.is_duplicate("a", 1));
            assert!(!ctx.is_duplicate("b", 2));
        }
        assert!(!ctx.is_registering());

        ctx.release("a", 2);
        let _guard = ctx.begin_registering();
        assert!(ctx.is_duplicate("a", 2));
        ctx.release("a", 1);
        assert!(!ctx.is_duplicate("a", 2));
    }

    #[test]
    fn test_user_root() {
        let ctx = HostContext::builder(RuntimeConfig::in_dir("/srv/tether"))
            .with_bridge(MemoryBridge::new())
            .build();
        assert!(ctx.is_user_root("/srv/tether/plugins/hello"));
        assert!(!ctx.is_user_root("/home/dev/hello"));
    }
}
