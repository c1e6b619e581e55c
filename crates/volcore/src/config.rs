//! Hierarchical key/value configuration handed to layer constructors.
//!
//! Keys are dotted paths (`primary.memory_layer.location`). Nested JSON
//! objects are flattened into this form on load so that a constructor can
//! take a [`ConfigMap::branch`] of its own sub-tree.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator between path components of a configuration key.
pub const SEPARATOR: char = '.';

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(u64),
    Str(String),
    List(Vec<String>),
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<u64> for ConfigValue {
    fn from(value: u64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(value: Vec<String>) -> Self {
        ConfigValue::List(value)
    }
}

/// Ordered configuration tree stored as dotted keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap {
    values: BTreeMap<String, ConfigValue>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join path components, skipping empty ones.
    pub fn path_join<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(&SEPARATOR.to_string())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.values.iter()
    }

    /// Read an integer value. Strings in `0x` hex or decimal form are accepted.
    pub fn get_int(&self, key: &str) -> CoreResult<u64> {
        match self.require(key)? {
            ConfigValue::Int(v) => Ok(*v),
            ConfigValue::Str(s) => parse_int(s).ok_or_else(|| wrong_type(key, "an integer")),
            _ => Err(wrong_type(key, "an integer")),
        }
    }

    pub fn get_str(&self, key: &str) -> CoreResult<&str> {
        match self.require(key)? {
            ConfigValue::Str(s) => Ok(s),
            _ => Err(wrong_type(key, "a string")),
        }
    }

    pub fn get_bool(&self, key: &str) -> CoreResult<bool> {
        match self.require(key)? {
            ConfigValue::Bool(b) => Ok(*b),
            _ => Err(wrong_type(key, "a boolean")),
        }
    }

    /// Read a list of strings. A single string is treated as a one-element list.
    pub fn get_list(&self, key: &str) -> CoreResult<Vec<String>> {
        match self.require(key)? {
            ConfigValue::List(items) => Ok(items.clone()),
            ConfigValue::Str(s) => Ok(vec![s.clone()]),
            _ => Err(wrong_type(key, "a list of strings")),
        }
    }

    pub fn get_int_opt(&self, key: &str) -> CoreResult<Option<u64>> {
        if self.contains(key) {
            self.get_int(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn get_str_opt(&self, key: &str) -> CoreResult<Option<&str>> {
        if self.contains(key) {
            self.get_str(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Snapshot of the sub-tree under `prefix`, with the prefix stripped from the keys.
    pub fn branch(&self, prefix: &str) -> ConfigMap {
        if prefix.is_empty() {
            return self.clone();
        }
        let lead = format!("{}{}", prefix, SEPARATOR);
        let values = self
            .values
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&lead).map(|rest| (rest.to_owned(), v.clone())))
            .collect();
        ConfigMap { values }
    }

    /// Insert every entry of `other` under `prefix`.
    pub fn splice(&mut self, prefix: &str, other: &ConfigMap) {
        for (k, v) in &other.values {
            self.values
                .insert(Self::path_join([prefix, k.as_str()]), v.clone());
        }
    }

    /// Names of the direct children of `prefix`.
    pub fn children(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .branch(prefix)
            .values
            .keys()
            .filter_map(|k| k.split(SEPARATOR).next().map(str::to_owned))
            .collect();
        names.dedup();
        names
    }

    /// Build a map from a (possibly nested) JSON document.
    pub fn from_json(text: &str) -> CoreResult<ConfigMap> {
        let root: serde_json::Value = serde_json::from_str(text)?;
        let mut map = ConfigMap::new();
        flatten_into(&mut map, "", &root)?;
        Ok(map)
    }

    /// Render the map as a flat JSON object.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn require(&self, key: &str) -> CoreResult<&ConfigValue> {
        self.values
            .get(key)
            .ok_or_else(|| CoreError::InvalidParameter(format!("missing configuration key '{}'", key)))
    }
}

fn wrong_type(key: &str, expected: &str) -> CoreError {
    CoreError::InvalidParameter(format!("configuration key '{}' is not {}", key, expected))
}

fn parse_int(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn flatten_into(map: &mut ConfigMap, prefix: &str, value: &serde_json::Value) -> CoreResult<()> {
    use serde_json::Value;
    match value {
        Value::Object(entries) => {
            for (k, v) in entries {
                flatten_into(map, &ConfigMap::path_join([prefix, k.as_str()]), v)?;
            }
        }
        Value::Bool(b) => map.set(prefix, *b),
        Value::Number(n) => {
            let v = n.as_u64().ok_or_else(|| {
                CoreError::InvalidParameter(format!("configuration key '{}' must be a non-negative integer", prefix))
            })?;
            map.set(prefix, v);
        }
        Value::String(s) => map.set(prefix, s.as_str()),
        Value::Array(items) => {
            let list = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(CoreError::InvalidParameter(format!(
                        "configuration list '{}' may only hold strings",
                        prefix
                    ))),
                })
                .collect::<CoreResult<Vec<_>>>()?;
            map.set(prefix, list);
        }
        Value::Null => {}
    }
    Ok(())
}
