//! In-process guest catalog
//!
//! Same-context plugins are compiled into the host. Their entry resource is
//! a name looked up here; each lookup builds a fresh guest.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tether_guest::Guest;

type Factory = Arc<dyn Fn() -> Arc<dyn Guest> + Send + Sync>;

#[derive(Default)]
pub struct GuestCatalog {
    factories: RwLock<HashMap<String, Factory>>,
}

impl GuestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a guest factory under an entry name.
    pub fn register<G, F>(&self, entry: impl Into<String>, factory: F)
    where
        G: Guest,
        F: Fn() -> G + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as Arc<dyn Guest>);
        self.factories.write().insert(entry.into(), factory);
    }

    pub fn with<G, F>(self, entry: impl Into<String>, factory: F) -> Self
    where
        G: Guest,
        F: Fn() -> G + Send + Sync + 'static,
    {
        self.register(entry, factory);
        self
    }

    /// Build a guest for an entry: exact name first, then the entry's file stem.
    pub fn create(&self, entry: &str) -> Option<Arc<dyn Guest>> {
        let factories = self.factories.read();
        let factory = factories.get(entry).or_else(|| {
            Path::new(entry)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| factories.get(stem))
        })?;
        Some(factory())
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.create(entry).is_some()
    }

    pub fn entries(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}
