//! Tether host runtime
//!
//! Discovers, isolates, starts, stops and talks to plugins.
//!
//! - [`PluginRegistry`]: the plugin population and the control surface
//!   (register, unregister, enable, disable, reload, themes, hooks)
//! - [`PluginInstance`]: one plugin's lifecycle state machine
//! - [`Transport`]: broadcast and correlated calls over an isolation backend
//! - [`backend`]: the remote (child process) and same-context boundaries
//!
//! ```ignore
//! let config = RuntimeConfig::load()?;
//! let ctx = HostContext::builder(config).build();
//! let registry = PluginRegistry::new(ctx);
//!
//! let packages = discover_packages(&registry.context().config.user_plugins_root).await?;
//! registry
//!     .register(packages.iter().map(|p| p.descriptor()).collect(), true)
//!     .await;
//! registry.host_mounted();
//! ```

pub mod backend;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod discover;
pub mod error;
pub mod events;
pub mod gate;
pub mod host_api;
pub mod instance;
pub mod logger;
pub mod registry;
pub mod settings;
pub mod theme;
pub mod transport;

pub use backend::{IsolationBackend, LaunchRequest, LaunchSpec, Launcher, ProcessLauncher, RemoteConnection};
pub use bridge::{FsBridge, HostBridge, MemoryBridge, ThemeDisposer};
pub use catalog::GuestCatalog;
pub use config::RuntimeConfig;
pub use context::{HostContext, HostContextBuilder};
pub use descriptor::{PackageConfig, PluginDescriptor};
pub use discover::{discover_packages, DiscoveredPackage};
pub use error::{BridgeError, PluginError, PluginResult, TransportError};
pub use events::{EventBus, SubscriptionId};
pub use host_api::{ApiCall, HostApi, HostApiBuilder};
pub use instance::{InstanceEvent, PluginInfo, PluginInstance, PluginStatus};
pub use logger::{LogEntry, PluginLogger};
pub use registry::{LoadReport, PluginRegistry, RegistryEvent, UserPreferences};
pub use settings::{SettingsChange, SettingsStore};
pub use theme::{ThemeEvent, ThemeManager};
pub use transport::{Transport, TransportEvent, TransportOptions};

pub use tether_protocol::{Hook, HookDomain, IsolationMode, ThemeOptions};
