//! Package discovery
//!
//! Looks for `package.json` in immediate subdirectories of a plugins
//! directory:
//!
//! ```text
//! plugins/
//! ├── hello/
//! │   ├── package.json  <- found
//! │   └── index.js
//! └── dusk-theme/
//!     ├── package.json  <- found
//!     └── dusk.css
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::bridge::PACKAGE_FILE;
use crate::descriptor::{PackageConfig, PluginDescriptor};
use crate::error::BridgeError;

#[derive(Debug, Clone)]
pub struct DiscoveredPackage {
    pub root: PathBuf,
    pub package: PackageConfig,
}

impl DiscoveredPackage {
    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::from_url(self.root.to_string_lossy().into_owned())
    }
}

/// Scan a directory for plugin packages. A missing directory yields an
/// empty list; unreadable or invalid packages are skipped with a warning.
pub async fn discover_packages(plugins_dir: &Path) -> Result<Vec<DiscoveredPackage>, BridgeError> {
    let mut discovered = Vec::new();

    if !tokio::fs::try_exists(plugins_dir).await.unwrap_or(false) {
        debug!(dir = %plugins_dir.display(), "Plugins directory does not exist");
        return Ok(discovered);
    }

    let mut entries = tokio::fs::read_dir(plugins_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let root = entry.path();
        if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            continue;
        }

        let package_path = root.join(PACKAGE_FILE);
        if !tokio::fs::try_exists(&package_path).await.unwrap_or(false) {
            continue;
        }

        match load_package(&package_path).await {
            Ok(package) => {
                debug!(root = %root.display(), name = ?package.name, "Discovered plugin");
                discovered.push(DiscoveredPackage { root, package });
            }
            Err(e) => {
                warn!(path = %package_path.display(), error = %e, "Skipping invalid package");
            }
        }
    }

    discovered.sort_by(|a, b| a.root.cmp(&b.root));
    Ok(discovered)
}

pub async fn load_package(path: &Path) -> Result<PackageConfig, BridgeError> {
    let text = tokio::fs::read_to_string(path).await?;
    let package: PackageConfig = serde_json::from_str(&text)?;
    if !package.is_loadable() {
        return Err(BridgeError::Other("no main entry or themes declared".into()));
    }
    Ok(package)
}
