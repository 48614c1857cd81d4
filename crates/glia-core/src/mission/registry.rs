//! Tool and layout registries - id to descriptor maps filled at startup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A pluggable panel a mission step can open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Event names the tool reports through `tool/event`. Empty means
    /// undeclared, and any name is accepted.
    #[serde(default)]
    pub events: Vec<String>,

    /// Opened by the runtime when a mission listing it starts
    #[serde(default)]
    pub default_open: bool,
}

impl ToolDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            events: Vec::new(),
            default_open: false,
        }
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_open(mut self) -> Self {
        self.default_open = true;
        self
    }
}

/// A top-level arrangement for a mission's tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDescriptor {
    pub id: String,

    pub title: String,
}

impl LayoutDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// Id to descriptor map. Registering an existing id replaces it with a
/// warning; the last registration wins.
#[derive(Debug, Clone)]
pub struct Registry<D> {
    kind: &'static str,
    entries: BTreeMap<String, D>,
}

pub type ToolRegistry = Registry<ToolDescriptor>;
pub type LayoutRegistry = Registry<LayoutDescriptor>;

impl<D> Registry<D> {
    /// `kind` names the entries in log output ("tool", "layout").
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, id: impl Into<String>, descriptor: D) -> Option<D> {
        let id = id.into();
        let previous = self.entries.insert(id.clone(), descriptor);
        if previous.is_some() {
            tracing::warn!(kind = self.kind, id = %id, "Overwriting existing registration");
        }
        previous
    }

    pub fn register_many<I, K>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, D)>,
        K: Into<String>,
    {
        for (id, descriptor) in entries {
            self.register(id, descriptor);
        }
    }

    pub fn get(&self, id: &str) -> Option<&D> {
        self.entries.get(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn unregister(&mut self, id: &str) -> Option<D> {
        self.entries.remove(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &D)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
