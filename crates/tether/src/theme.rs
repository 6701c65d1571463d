//! Theme registrations
//!
//! Plugin id → ordered list of contributed themes, plus a single current
//! selection shared by the whole host. Replacing the selection disposes the
//! previous theme before the new one is injected.

use std::collections::HashMap;

use parking_lot::Mutex;
use tether_protocol::ThemeOptions;
use tracing::debug;

use crate::bridge::ThemeDisposer;
use crate::events::{EventBus, SubscriptionId};

#[derive(Debug, Clone, PartialEq)]
pub enum ThemeEvent {
    /// A plugin's theme list changed; `theme` is `None` when all of the
    /// plugin's themes were removed.
    Changed {
        plugin: String,
        theme: Option<ThemeOptions>,
    },
    Selected(Option<ThemeOptions>),
}

struct Current {
    theme: ThemeOptions,
    disposer: ThemeDisposer,
}

#[derive(Default)]
struct State {
    registered: HashMap<String, Vec<ThemeOptions>>,
    current: Option<Current>,
}

#[derive(Default)]
pub struct ThemeManager {
    state: Mutex<State>,
    events: EventBus<ThemeEvent>,
}

impl ThemeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: &str, mut theme: ThemeOptions) {
        if plugin.is_empty() {
            return;
        }
        theme.pid = Some(plugin.to_string());
        debug!(plugin = %plugin, theme = %theme.name, "Registered theme");

        self.state
            .lock()
            .registered
            .entry(plugin.to_string())
            .or_default()
            .push(theme.clone());

        self.events.emit(&ThemeEvent::Changed {
            plugin: plugin.to_string(),
            theme: Some(theme),
        });
    }

    /// Drop a plugin's themes. If it owns the current selection, that is
    /// cleared too and its disposer is returned for the caller to run.
    pub fn unregister(&self, plugin: &str) -> Option<ThemeDisposer> {
        let (removed, disposer) = {
            let mut state = self.state.lock();
            let removed = state.registered.remove(plugin).is_some();
            let owns_current = state
                .current
                .as_ref()
                .is_some_and(|c| c.theme.pid.as_deref() == Some(plugin));
            let disposer = if owns_current {
                state.current.take().map(|c| c.disposer)
            } else {
                None
            };
            (removed, disposer)
        };

        if removed {
            debug!(plugin = %plugin, "Unregistered themes");
            self.events.emit(&ThemeEvent::Changed {
                plugin: plugin.to_string(),
                theme: None,
            });
        }
        disposer
    }

    /// Replace the current selection. The previous disposer runs exactly
    /// once, before `inject` is called for the new theme.
    ///
    /// Neither the disposer nor `inject` runs under the state lock, so both
    /// may call back into the manager.
    pub fn select<F>(&self, theme: Option<ThemeOptions>, inject: F)
    where
        F: FnOnce(&ThemeOptions) -> ThemeDisposer,
    {
        let previous = self.state.lock().current.take();
        if let Some(previous) = previous {
            dispose(previous);
        }

        let next = theme.as_ref().map(|theme| Current {
            theme: theme.clone(),
            disposer: inject(theme),
        });
        // a select that raced in between loses to this one
        let displaced = std::mem::replace(&mut self.state.lock().current, next);
        if let Some(displaced) = displaced {
            dispose(displaced);
        }

        self.events.emit(&ThemeEvent::Selected(theme));
    }

    pub fn current(&self) -> Option<ThemeOptions> {
        self.state.lock().current.as_ref().map(|c| c.theme.clone())
    }

    pub fn themes_of(&self, plugin: &str) -> Vec<ThemeOptions> {
        self.state
            .lock()
            .registered
            .get(plugin)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<String, Vec<ThemeOptions>> {
        self.state.lock().registered.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ThemeEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }
}

fn dispose(current: Current) {
    debug!(theme = %current.theme.name, "Disposing theme");
    current.disposer.dispose();
}
