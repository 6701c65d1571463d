//! Per-plugin settings store
//!
//! A string-keyed map of JSON values that always carries a `disabled`
//! flag. Every effective mutation emits a [`SettingsChange`] with the new
//! and old snapshots; persistence is done by the owning instance in
//! response to that event.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::events::{EventBus, SubscriptionId};

pub const DISABLED_KEY: &str = "disabled";

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsChange {
    pub new: Value,
    pub old: Value,
}

impl SettingsChange {
    /// The `disabled` flag if this change flipped it.
    pub fn disabled_flip(&self) -> Option<bool> {
        let new = flag(&self.new);
        (new != flag(&self.old)).then_some(new)
    }
}

fn flag(snapshot: &Value) -> bool {
    snapshot
        .get(DISABLED_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    values: RwLock<Map<String, Value>>,
    changes: EventBus<SettingsChange>,
}

impl SettingsStore {
    /// Build from a persisted snapshot. Non-object snapshots are discarded.
    pub fn new(path: Option<PathBuf>, initial: Value) -> Self {
        let mut values = match initial {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        values
            .entry(DISABLED_KEY.to_string())
            .or_insert(Value::Bool(false));

        Self {
            path,
            values: RwLock::new(values),
            changes: EventBus::new(),
        }
    }

    /// Settings file backing this store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.read().clone())
    }

    pub fn disabled(&self) -> bool {
        flag(&self.snapshot())
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.set(DISABLED_KEY, Value::Bool(disabled));
    }

    /// Set one key.
    pub fn set(&self, key: &str, value: Value) {
        self.mutate(|values| {
            values.insert(key.to_string(), value);
        });
    }

    /// Deep-merge an object patch into the settings.
    pub fn merge(&self, patch: Value) {
        if let Value::Object(patch) = patch {
            self.mutate(|values| deep_merge(values, patch));
        }
    }

    /// Replace everything (the `disabled` flag is kept unless given).
    pub fn replace(&self, settings: Value) {
        let Value::Object(mut next) = settings else {
            return;
        };
        self.mutate(|values| {
            if !next.contains_key(DISABLED_KEY) {
                let disabled = values
                    .get(DISABLED_KEY)
                    .cloned()
                    .unwrap_or(Value::Bool(false));
                next.insert(DISABLED_KEY.to_string(), disabled);
            }
            *values = next;
        });
    }

    pub fn on_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SettingsChange) + Send + Sync + 'static,
    {
        self.changes.subscribe(listener)
    }

    pub fn off_change(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }

    fn mutate(&self, f: impl FnOnce(&mut Map<String, Value>)) {
        let change = {
            let mut values = self.values.write();
            let old = Value::Object(values.clone());
            f(&mut *values);
            let new = Value::Object(values.clone());
            if new == old {
                return;
            }
            SettingsChange { new, old }
        };
        self.changes.emit(&change);
    }
}

fn deep_merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Object(incoming) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => deep_merge(existing, incoming),
                _ => {
                    target.insert(key, Value::Object(incoming));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}
