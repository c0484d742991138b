//! Typed key-path overlay for process configuration.
//!
//! Process arguments and user-supplied additional options are nested JSON objects on the wire. In
//! memory they are held flattened: an ordered map from dotted key paths (`net.tls.mode`) to leaf
//! values. Arrays and scalars are leaves; objects are never stored as values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A dotted key path such as `net.tls.mode`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Parse a dotted path. Empty segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self(path.split('.').filter(|seg| !seg.is_empty()).map(String::from).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Check whether `self` is `other` or lies underneath it.
    pub fn starts_with(&self, other: &KeyPath) -> bool {
        self.0.starts_with(&other.0)
    }

    fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// An ordered association of key paths to leaf values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptionsOverlay {
    entries: BTreeMap<KeyPath, Value>,
}

impl OptionsOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a nested JSON object. Non-object input yields an empty overlay.
    pub fn flatten(value: &Value) -> Self {
        let mut overlay = Self::new();
        if let Value::Object(map) = value {
            flatten_into(&KeyPath(vec![]), map, &mut overlay.entries);
        }
        overlay
    }

    /// Rebuild the nested JSON object described by this overlay.
    pub fn unflatten(&self) -> Value {
        let mut root = Map::new();
        for (path, value) in self.entries.iter() {
            insert_path(&mut root, path.segments(), value.clone());
        }
        Value::Object(root)
    }

    /// Merge `overlay` onto `base`, returning a new overlay. Overlay values win.
    pub fn merge(base: &Self, overlay: &Self) -> Self {
        let mut merged = base.clone();
        for (path, value) in overlay.entries.iter() {
            merged.set(path.clone(), value.clone());
        }
        merged
    }

    /// Apply user additional options onto process arguments.
    ///
    /// Keys which were set by `previous` but are absent from `desired` are removed from `self`
    /// before `desired` is merged on top.
    pub fn with_additional_options(&self, previous: &Self, desired: &Self) -> Self {
        let mut result = self.clone();
        for path in previous.entries.keys() {
            if !desired.entries.contains_key(path) {
                result.remove(path.clone());
            }
        }
        Self::merge(&result, desired)
    }

    pub fn get(&self, path: impl Into<KeyPath>) -> Option<&Value> {
        self.entries.get(&path.into())
    }

    pub fn get_str(&self, path: impl Into<KeyPath>) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Set a leaf value, dropping any entries which would conflict with the new leaf.
    pub fn set(&mut self, path: impl Into<KeyPath>, value: impl Into<Value>) {
        let path = path.into();
        let value = value.into();
        if let Some(map) = value.as_object().filter(|map| !map.is_empty()) {
            self.entries.retain(|key, _| !(key.starts_with(&path) || path.starts_with(key)));
            flatten_into(&path, map, &mut self.entries);
            return;
        }
        // A leaf cannot coexist with children, nor sit below another leaf.
        self.entries.retain(|key, _| !(key.starts_with(&path) || path.starts_with(key)));
        self.entries.insert(path, value);
    }

    /// Remove a leaf, or an entire subtree when `path` names an intermediate object.
    pub fn remove(&mut self, path: impl Into<KeyPath>) {
        let path = path.into();
        self.entries.retain(|key, _| !key.starts_with(&path));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyPath, &Value)> {
        self.entries.iter()
    }
}

fn flatten_into(prefix: &KeyPath, map: &Map<String, Value>, out: &mut BTreeMap<KeyPath, Value>) {
    for (key, value) in map.iter() {
        let path = prefix.child(key);
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(&path, inner, out),
            // Empty objects are leaves.
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

fn insert_path(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => (),
        [last] => {
            map.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let slot = map.entry(first.clone()).or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

impl Serialize for OptionsOverlay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.unflatten().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OptionsOverlay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::flatten(&value))
    }
}
