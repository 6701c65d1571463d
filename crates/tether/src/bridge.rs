//! Host collaborators
//!
//! Everything the runtime persists or renders goes through a `HostBridge`:
//! plugin settings, package descriptors, user preferences, generated entry
//! documents and theme injection. [`FsBridge`] keeps files under a data
//! directory; [`MemoryBridge`] keeps everything in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use tether_protocol::ThemeOptions;

use crate::error::BridgeError;

/// Package descriptor file name inside a plugin root.
pub const PACKAGE_FILE: &str = "package.json";

// ─────────────────────────────────────────────────────────────────────────────
// Theme disposer
// ─────────────────────────────────────────────────────────────────────────────

/// Removes an injected theme. Runs at most once.
pub struct ThemeDisposer(Option<Box<dyn FnOnce() + Send + Sync>>);

impl ThemeDisposer {
    pub fn new<F: FnOnce() + Send + Sync + 'static>(f: F) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    pub fn dispose(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl std::fmt::Debug for ThemeDisposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ThemeDisposer")
            .field(&self.0.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge trait
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Returns the settings file location and its current contents.
    async fn load_plugin_user_settings(&self, key: &str) -> Result<(PathBuf, Value), BridgeError>;

    async fn save_plugin_user_settings(&self, key: &str, settings: &Value) -> Result<(), BridgeError>;

    /// Raw package descriptor text for the package rooted at `url`.
    async fn load_plugin_config(&self, url: &str) -> Result<String, BridgeError>;

    async fn save_plugin_config(&self, url: &str, config: &Value) -> Result<(), BridgeError>;

    async fn load_user_preferences(&self) -> Result<Value, BridgeError>;

    async fn save_user_preferences(&self, prefs: &Value) -> Result<(), BridgeError>;

    /// Write a generated file and return its path.
    async fn write_user_tmp_file(&self, name: &str, contents: &str) -> Result<PathBuf, BridgeError>;

    /// Directory holding the host's own binaries.
    fn app_path(&self) -> PathBuf;

    /// Delete an installed plugin package.
    async fn remove_plugin_files(&self, root: &Path) -> Result<(), BridgeError>;

    fn inject_theme(&self, theme: &ThemeOptions) -> ThemeDisposer;
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Layout under `data_dir`:
///
/// ```text
/// data_dir/
/// ├── preferences.json
/// ├── settings/<key>.json
/// └── tmp/<generated files>
/// ```
pub struct FsBridge {
    data_dir: PathBuf,
    app_path: PathBuf,
    injected: Arc<Mutex<Vec<String>>>,
}

impl FsBridge {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let app_path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: data_dir.into(),
            app_path,
            injected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_app_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.app_path = path.into();
        self
    }

    /// Names of currently injected themes.
    pub fn injected_themes(&self) -> Vec<String> {
        self.injected.lock().clone()
    }

    fn settings_path(&self, key: &str) -> PathBuf {
        self.data_dir.join("settings").join(format!("{key}.json"))
    }

    fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    async fn write_json(path: &Path, value: &Value) -> Result<(), BridgeError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    async fn read_json_or_empty(path: &Path) -> Result<Value, BridgeError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Value::Object(Default::default()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl HostBridge for FsBridge {
    async fn load_plugin_user_settings(&self, key: &str) -> Result<(PathBuf, Value), BridgeError> {
        let path = self.settings_path(key);
        let settings = Self::read_json_or_empty(&path).await?;
        Ok((path, settings))
    }

    async fn save_plugin_user_settings(&self, key: &str, settings: &Value) -> Result<(), BridgeError> {
        Self::write_json(&self.settings_path(key), settings).await
    }

    async fn load_plugin_config(&self, url: &str) -> Result<String, BridgeError> {
        let path = Path::new(url).join(PACKAGE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BridgeError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_plugin_config(&self, url: &str, config: &Value) -> Result<(), BridgeError> {
        Self::write_json(&Path::new(url).join(PACKAGE_FILE), config).await
    }

    async fn load_user_preferences(&self) -> Result<Value, BridgeError> {
        Self::read_json_or_empty(&self.preferences_path()).await
    }

    async fn save_user_preferences(&self, prefs: &Value) -> Result<(), BridgeError> {
        Self::write_json(&self.preferences_path(), prefs).await
    }

    async fn write_user_tmp_file(&self, name: &str, contents: &str) -> Result<PathBuf, BridgeError> {
        let dir = self.data_dir.join("tmp");
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, contents).await?;
        debug!(path = %path.display(), "Wrote generated file");
        Ok(path)
    }

    fn app_path(&self) -> PathBuf {
        self.app_path.clone()
    }

    async fn remove_plugin_files(&self, root: &Path) -> Result<(), BridgeError> {
        info!(root = %root.display(), "Removing plugin files");
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn inject_theme(&self, theme: &ThemeOptions) -> ThemeDisposer {
        info!(theme = %theme.name, url = %theme.url, "Injecting theme");
        let url = theme.url.clone();
        self.injected.lock().push(url.clone());

        let injected = self.injected.clone();
        ThemeDisposer::new(move || {
            injected.lock().retain(|u| *u != url);
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory bridge
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    configs: HashMap<String, String>,
    settings: HashMap<String, Value>,
    preferences: Value,
    tmp_files: HashMap<String, String>,
    removed: Vec<PathBuf>,
    theme_log: Vec<String>,
}

/// Bridge that keeps everything in memory. Useful for embedding and tests.
#[derive(Clone, Default)]
pub struct MemoryBridge {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package descriptor for the package rooted at `url`.
    pub fn with_package(self, url: impl Into<String>, config: Value) -> Self {
        self.state
            .lock()
            .configs
            .insert(url.into(), config.to_string());
        self
    }

    pub fn with_preferences(self, prefs: Value) -> Self {
        self.state.lock().preferences = prefs;
        self
    }

    pub fn with_settings(self, key: impl Into<String>, settings: Value) -> Self {
        self.state.lock().settings.insert(key.into(), settings);
        self
    }

    pub fn package(&self, url: &str) -> Option<Value> {
        self.state
            .lock()
            .configs
            .get(url)
            .and_then(|text| serde_json::from_str(text).ok())
    }

    pub fn settings(&self, key: &str) -> Option<Value> {
        self.state.lock().settings.get(key).cloned()
    }

    pub fn preferences(&self) -> Value {
        self.state.lock().preferences.clone()
    }

    pub fn tmp_file(&self, name: &str) -> Option<String> {
        self.state.lock().tmp_files.get(name).cloned()
    }

    pub fn removed_roots(&self) -> Vec<PathBuf> {
        self.state.lock().removed.clone()
    }

    /// `inject:<name>` / `dispose:<name>` entries in call order.
    pub fn theme_log(&self) -> Vec<String> {
        self.state.lock().theme_log.clone()
    }
}

#[async_trait]
impl HostBridge for MemoryBridge {
    async fn load_plugin_user_settings(&self, key: &str) -> Result<(PathBuf, Value), BridgeError> {
        let settings = self
            .state
            .lock()
            .settings
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok((PathBuf::from(format!("memory://settings/{key}.json")), settings))
    }

    async fn save_plugin_user_settings(&self, key: &str, settings: &Value) -> Result<(), BridgeError> {
        self.state
            .lock()
            .settings
            .insert(key.to_string(), settings.clone());
        Ok(())
    }

    async fn load_plugin_config(&self, url: &str) -> Result<String, BridgeError> {
        self.state
            .lock()
            .configs
            .get(url)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("{url}/{PACKAGE_FILE}")))
    }

    async fn save_plugin_config(&self, url: &str, config: &Value) -> Result<(), BridgeError> {
        self.state
            .lock()
            .configs
            .insert(url.to_string(), config.to_string());
        Ok(())
    }

    async fn load_user_preferences(&self) -> Result<Value, BridgeError> {
        Ok(self.state.lock().preferences.clone())
    }

    async fn save_user_preferences(&self, prefs: &Value) -> Result<(), BridgeError> {
        self.state.lock().preferences = prefs.clone();
        Ok(())
    }

    async fn write_user_tmp_file(&self, name: &str, contents: &str) -> Result<PathBuf, BridgeError> {
        self.state
            .lock()
            .tmp_files
            .insert(name.to_string(), contents.to_string());
        Ok(PathBuf::from(format!("memory://tmp/{name}")))
    }

    fn app_path(&self) -> PathBuf {
        PathBuf::from("memory://app")
    }

    async fn remove_plugin_files(&self, root: &Path) -> Result<(), BridgeError> {
        self.state.lock().removed.push(root.to_path_buf());
        Ok(())
    }

    fn inject_theme(&self, theme: &ThemeOptions) -> ThemeDisposer {
        self.state
            .lock()
            .theme_log
            .push(format!("inject:{}", theme.name));

        let state = self.state.clone();
        let name = theme.name.clone();
        ThemeDisposer::new(move || {
            state.lock().theme_log.push(format!("dispose:{name}"));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_bridge_settings_and_preferences() {
        let temp = TempDir::new().unwrap();
        let bridge = FsBridge::new(temp.path());

        let (path, settings) = bridge.load_plugin_user_settings("demo_abc").await.unwrap();
        assert_eq!(settings, json!({}));
        assert!(path.ends_with("settings/demo_abc.json"));

        bridge
            .save_plugin_user_settings("demo_abc", &json!({"disabled": true}))
            .await
            .unwrap();
        let (_, settings) = bridge.load_plugin_user_settings("demo_abc").await.unwrap();
        assert_eq!(settings["disabled"], true);

        bridge
            .save_user_preferences(&json!({"externals": ["/tmp/p"]}))
            .await
            .unwrap();
        assert_eq!(
            bridge.load_user_preferences().await.unwrap()["externals"][0],
            "/tmp/p"
        );
    }

    #[tokio::test]
    async fn test_fs_bridge_package_config() {
        let temp = TempDir::new().unwrap();
        let bridge = FsBridge::new(temp.path().join("data"));
        let root = temp.path().join("pkg");
        std::fs::create_dir(&root).unwrap();
        let url = root.to_string_lossy().to_string();

        assert!(matches!(
            bridge.load_plugin_config(&url).await,
            Err(BridgeError::NotFound(_))
        ));

        bridge
            .save_plugin_config(&url, &json!({"name": "pkg"}))
            .await
            .unwrap();
        let text = bridge.load_plugin_config(&url).await.unwrap();
        assert!(text.contains("\"pkg\""));

        bridge.remove_plugin_files(&root).await.unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_theme_disposer_runs_once() {
        let bridge = MemoryBridge::new();
        let theme = ThemeOptions {
            name: "dark".into(),
            url: "dark.css".into(),
            ..Default::default()
        };
        let disposer = bridge.inject_theme(&theme);
        disposer.dispose();
        assert_eq!(bridge.theme_log(), vec!["inject:dark", "dispose:dark"]);
    }
}
