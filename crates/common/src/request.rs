//! Canonical request field map
//!
//! The protocol layer flattens path, query and body parameters into this
//! map before any backend sees them. Values are accepted leniently: booleans
//! and integers may arrive as strings, and single values may stand in for
//! one-element lists.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(Map<String, Value>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(Error::invalid(format!(
                "request body must be an object, got {}",
                other
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// Present and not null
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// First required field that is absent
    pub fn missing<'a>(&self, required: &[&'a str]) -> Option<&'a str> {
        required.iter().copied().find(|name| !self.contains(name))
    }

    pub fn str(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(Error::invalid(format!(
                "{} must be a string, got {}",
                name, other
            ))),
        }
    }

    pub fn require_str(&self, name: &str) -> Result<String> {
        self.str(name)?
            .ok_or_else(|| Error::MissingParameter(name.to_string()))
    }

    pub fn bool(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
            Some(other) => Err(Error::invalid(format!(
                "{} must be a boolean, got {}",
                name, other
            ))),
        }
    }

    pub fn i64(&self, name: &str) -> Result<Option<i64>> {
        let invalid = |v: &Value| Error::invalid(format!("{} must be an integer, got {}", name, v));
        match self.get(name) {
            None => Ok(None),
            Some(v @ Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| invalid(v)),
            Some(v @ Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(v)),
            Some(other) => Err(invalid(other)),
        }
    }

    pub fn str_list(&self, name: &str) -> Result<Option<Vec<String>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(Error::invalid(format!(
                        "{} must contain strings, got {}",
                        name, other
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(Error::invalid(format!(
                "{} must be a list of strings, got {}",
                name, other
            ))),
        }
    }

    /// Nested list of objects, for modeled sub-structures
    pub fn objects(&self, name: &str) -> Result<Option<Vec<FieldMap>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(FieldMap::from_value)
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(Error::invalid(format!(
                "{} must be a list of objects, got {}",
                name, other
            ))),
        }
    }

    /// Label set from `labels` (object) or `tags` (list of key/value pairs)
    pub fn labels(&self) -> Result<Option<BTreeMap<String, String>>> {
        if let Some(value) = self.get("labels") {
            let Value::Object(map) = value else {
                return Err(Error::invalid("labels must be an object"));
            };
            return map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    other => Err(Error::invalid(format!(
                        "label '{}' must be a string, got {}",
                        k, other
                    ))),
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Some);
        }
        match self.objects("tags")? {
            None => Ok(None),
            Some(tags) => tags
                .iter()
                .map(|tag| {
                    let key = tag.require_str("key")?;
                    let value = tag.str("value")?.unwrap_or_default();
                    Ok((key, value))
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Some),
        }
    }
}

impl From<Map<String, Value>> for FieldMap {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
