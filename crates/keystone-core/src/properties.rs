// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Immutable property snapshots attached to services, configurations and resources.
//!
//! A [`Properties`] value is never shared mutably: every place that publishes
//! properties (a service registration, a configuration update, a propagated
//! dependency) computes a fresh snapshot, so a consumer can hold on to one
//! without observing later changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Registry-assigned identity of a service.
pub const SERVICE_ID: &str = "service.id";
/// Ranking of a service; higher rankings are preferred.
pub const SERVICE_RANKING: &str = "service.ranking";
/// Persistent identity of a configuration.
pub const SERVICE_PID: &str = "service.pid";
/// Factory pid a configuration instance was created from.
pub const FACTORY_PID: &str = "service.factoryPid";
/// Names under which a service was registered.
pub const OBJECT_CLASS: &str = "objectClass";
/// Marks a service as an aspect; the value is the id of the decorated original.
pub const ASPECT: &str = "keystone.aspect";

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A boolean flag.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// A list of strings, e.g. the registered service names.
    List(Vec<String>),
}

impl PropertyValue {
    /// Returns the string slice if this is a [`PropertyValue::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an integer, parsing strings if needed.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a boolean, parsing strings if needed.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the list if this is a [`PropertyValue::List`].
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// The textual forms of this value, one per element for lists.
    ///
    /// Filters match against these forms.
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            PropertyValue::List(l) => l.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Str(s) => f.write_str(s),
            PropertyValue::List(l) => write!(f, "[{}]", l.join(", ")),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::List(value)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(value: Vec<&str>) -> Self {
        PropertyValue::List(value.into_iter().map(str::to_string).collect())
    }
}

/// An ordered, immutable-by-convention map of named values.
///
/// # Example
///
/// ```rust
/// use keystone_core::properties::Properties;
///
/// let props = Properties::new().with("testkey", "testvalue").with("service.ranking", 10);
/// assert_eq!(props.get_str("testkey"), Some("testvalue"));
/// assert_eq!(props.ranking(), 10);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Removes a value, returning it.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    /// Looks a value up by exact key, then case-insensitively.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    /// Looks a string value up.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    /// Looks an integer value up.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(PropertyValue::as_int)
    }

    /// Returns `true` if the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.entries.iter()
    }

    /// Copies every entry of `other` into `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// Returns a new snapshot of `self` overridden by `other`.
    #[must_use]
    pub fn merged(&self, other: &Properties) -> Properties {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Returns a copy without the private keys (those starting with `.`).
    #[must_use]
    pub fn public(&self) -> Properties {
        self.entries
            .iter()
            .filter(|(k, _)| !k.starts_with('.'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns a copy without the registry-managed keys.
    #[must_use]
    pub fn without_framework_keys(&self) -> Properties {
        self.entries
            .iter()
            .filter(|(k, _)| {
                let k = k.as_str();
                k != SERVICE_ID && k != SERVICE_RANKING && k != OBJECT_CLASS
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The `service.ranking` value, 0 when absent.
    pub fn ranking(&self) -> i64 {
        self.get_int(SERVICE_RANKING).unwrap_or(0)
    }

    /// The `service.id` value, if any.
    pub fn service_id(&self) -> Option<u64> {
        self.get_int(SERVICE_ID).and_then(|id| u64::try_from(id).ok())
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = (&'a String, &'a PropertyValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}
