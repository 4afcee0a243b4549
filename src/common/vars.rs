//! JSON object map used for run contexts and action outputs.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// String-keyed map of JSON values.
///
/// A run's context is a `Vars` snapshot taken at trigger time; template
/// placeholders and condition fields resolve against it by dot path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars {
    inner: Map<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to any serializable value.
    pub fn set<V: Serialize>(
        &mut self,
        key: &str,
        value: V,
    ) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.inner.insert(key.to_string(), value);
    }

    /// Builder-style `set`.
    pub fn with<V: Serialize>(
        mut self,
        key: &str,
        value: V,
    ) -> Self {
        self.set(key, value);
        self
    }

    /// Get a top-level value deserialized into `T`.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<T> {
        self.inner.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Follow a dot-separated path through nested objects and arrays.
    ///
    /// Array segments are numeric indexes. Empty segments never match.
    pub fn lookup(
        &self,
        path: &str,
    ) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;
        let mut current = self.inner.get(first)?;
        for segment in segments {
            if segment.is_empty() {
                return None;
            }
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.inner.clone()).to_string()
    }

    pub fn from_json_str(s: &str) -> crate::Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_json::from_str(s)?)
    }
}

impl Deref for Vars {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Vars {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Non-object values become a single `value` entry.
impl From<Value> for Vars {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(inner) => Self {
                inner,
            },
            Value::Null => Self::new(),
            other => Self::new().with("value", other),
        }
    }
}

impl From<Vars> for Value {
    fn from(vars: Vars) -> Self {
        Value::Object(vars.inner)
    }
}

impl From<Map<String, Value>> for Vars {
    fn from(inner: Map<String, Value>) -> Self {
        Self {
            inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_lookup_nested() {
        let vars = Vars::from(json!({"client": {"name": "Acme", "tags": ["vip", "b2b"]}}));
        assert_eq!(vars.lookup("client.name"), Some(&json!("Acme")));
        assert_eq!(vars.lookup("client.tags.1"), Some(&json!("b2b")));
        assert_eq!(vars.lookup("client.missing"), None);
        assert_eq!(vars.lookup("client..name"), None);
        assert_eq!(vars.lookup(""), None);
    }

    #[test]
    fn test_lookup_through_scalar_fails() {
        let vars = Vars::new().with("status", "active");
        assert_eq!(vars.lookup("status.length"), None);
    }

    #[test]
    fn test_get_typed() {
        let vars = Vars::new().with("count", 3).with("name", "x");
        assert_eq!(vars.get::<i64>("count"), Some(3));
        assert_eq!(vars.get::<String>("name"), Some("x".to_string()));
        assert_eq!(vars.get::<i64>("name"), None);
    }

    #[test]
    fn test_json_string_round() {
        let vars = Vars::from(json!({"task": {"priority": "high"}}));
        let parsed = Vars::from_json_str(&vars.to_json_string()).unwrap();
        assert_eq!(parsed, vars);
        assert_eq!(Vars::from_json_str("").unwrap(), Vars::new());
    }
}
