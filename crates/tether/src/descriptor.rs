//! Plugin descriptors
//!
//! A [`PluginDescriptor`] is what the registry is asked to load: either a
//! package root (`url`) whose `package.json` is read during `load`, or an
//! explicit entry. Fields below the identity block are filled in from the
//! package during normalisation.
//!
//! ```json
//! {
//!   "name": "hello",
//!   "version": "0.1.0",
//!   "main": "index.js",
//!   "tether": {
//!     "id": "hello",
//!     "mode": "remote",
//!     "themes": [{ "name": "Dusk", "url": "dusk.css", "mode": "dark" }]
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_protocol::{IsolationMode, ThemeOptions};

/// Package section holding the runtime-specific fields.
pub const PACKAGE_SECTION: &str = "tether";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Explicit key; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Package root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Entry resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(default)]
    pub mode: IsolationMode,
    /// Pre-set settings used when nothing is persisted yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<ThemeOptions>,
}

impl PluginDescriptor {
    /// Descriptor for a package root.
    pub fn from_url(url: impl AsRef<str>) -> Self {
        Self {
            url: Some(normalize_location(url.as_ref())),
            ..Default::default()
        }
    }

    /// Descriptor for an explicit entry, no package.
    pub fn from_entry(id: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            entry: Some(entry.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_mode(mut self, mode: IsolationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Copy the allow-listed package fields and resolve paths against the
    /// package root. Returns the id declared by the package, if any.
    pub(crate) fn apply_package(&mut self, root: &str, pkg: &PackageConfig) -> Option<String> {
        self.name = pkg.name.clone().or(self.name.take());
        self.version = pkg.version.clone().or(self.version.take());
        self.description = pkg.description.clone().or(self.description.take());
        self.author = pkg.author.as_ref().and_then(person).or(self.author.take());
        self.repository = pkg
            .repository
            .as_ref()
            .and_then(repository)
            .or(self.repository.take());

        let section = &pkg.section;
        if let Some(mode) = section.mode {
            self.mode = mode;
        }
        if let Some(main) = section.main.as_ref().or(pkg.main.as_ref()) {
            self.entry = Some(resolve(root, main));
        }
        if let Some(icon) = section.icon.as_ref().or(pkg.icon.as_ref()) {
            self.icon = Some(resolve(root, icon));
        }
        self.themes = section
            .themes
            .iter()
            .cloned()
            .map(|mut theme| {
                theme.url = resolve(root, &theme.url);
                theme
            })
            .collect();

        section.id.clone().filter(|id| !id.is_empty())
    }
}

/// `package.json` contents the runtime cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<Value>,
    pub repository: Option<Value>,
    pub main: Option<String>,
    pub icon: Option<String>,
    #[serde(default, rename = "tether")]
    pub section: PackageSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageSection {
    pub id: Option<String>,
    pub main: Option<String>,
    pub mode: Option<IsolationMode>,
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub themes: Vec<ThemeOptions>,
}

impl PackageConfig {
    pub fn parse(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// A package must declare something to load: an entry or themes.
    pub fn is_loadable(&self) -> bool {
        self.main.is_some() || self.section.main.is_some() || !self.section.themes.is_empty()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<ThemeOptions>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(ThemeOptions),
        Many(Vec<ThemeOptions>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(theme)) => vec![theme],
        Some(OneOrMany::Many(themes)) => themes,
        None => Vec::new(),
    })
}

/// `"Ada <ada@example.com>"` or `{ "name": "Ada" }`.
fn person(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn repository(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Join a relative resource onto the package root. Absolute paths and
/// scheme-qualified resources pass through.
pub fn resolve(root: &str, resource: &str) -> String {
    if resource.contains("://") || Path::new(resource).is_absolute() {
        return resource.to_string();
    }
    let relative = resource.trim_start_matches("./");
    Path::new(root).join(relative).to_string_lossy().into_owned()
}

/// Canonical form of a package root: redundant separators, `.` segments
/// and trailing slashes are dropped so one location has one spelling.
pub fn normalize_location(url: &str) -> String {
    if url.contains("://") {
        return url.trim_end_matches('/').to_string();
    }
    Path::new(url)
        .components()
        .collect::<PathBuf>()
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_package_allow_list() {
        let pkg = PackageConfig::parse(&json!({
            "name": "hello",
            "version": "1.2.0",
            "author": {"name": "Ada"},
            "repository": {"type": "git", "url": "https://example.com/hello.git"},
            "main": "./dist/index.js",
            "private": true,
            "tether": {
                "id": "hello-id",
                "mode": "same-context",
                "themes": {"name": "Dusk", "url": "dusk.css"}
            }
        }))
        .unwrap();
        assert!(pkg.is_loadable());

        let mut descriptor = PluginDescriptor::from_url("/plugins/hello");
        let id = descriptor.apply_package("/plugins/hello", &pkg);

        assert_eq!(id.as_deref(), Some("hello-id"));
        assert_eq!(descriptor.name.as_deref(), Some("hello"));
        assert_eq!(descriptor.author.as_deref(), Some("Ada"));
        assert_eq!(
            descriptor.repository.as_deref(),
            Some("https://example.com/hello.git")
        );
        assert_eq!(descriptor.mode, IsolationMode::SameContext);
        assert_eq!(descriptor.entry.as_deref(), Some("/plugins/hello/dist/index.js"));
        assert_eq!(descriptor.themes.len(), 1);
        assert_eq!(descriptor.themes[0].url, "/plugins/hello/dusk.css");
    }

    #[test]
    fn test_resolve_passthrough() {
        assert_eq!(resolve("/p", "https://cdn/x.css"), "https://cdn/x.css");
        assert_eq!(resolve("/p", "/abs/x.css"), "/abs/x.css");
        assert_eq!(resolve("/p", "x.css"), "/p/x.css");
    }

    #[test]
    fn test_normalize_location() {
        assert_eq!(normalize_location("/ext/a/"), "/ext/a");
        assert_eq!(normalize_location("/ext//a/./"), "/ext/a");
        assert_eq!(normalize_location("/ext/a"), "/ext/a");
        assert_eq!(normalize_location("file:///ext/a/"), "file:///ext/a");
        assert_eq!(PluginDescriptor::from_url("/ext/a/").url.as_deref(), Some("/ext/a"));
    }

    #[test]
    fn test_theme_only_package() {
        let pkg = PackageConfig::parse(&json!({
            "name": "dusk",
            "tether": {"themes": [{"name": "Dusk", "url": "dusk.css"}]}
        }))
        .unwrap();
        assert!(pkg.is_loadable());

        let empty = PackageConfig::parse(&json!({"name": "nothing"})).unwrap();
        assert!(!empty.is_loadable());
    }
}
