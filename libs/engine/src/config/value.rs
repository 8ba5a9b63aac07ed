//! Typed access to declarative configuration maps
//!
//! The declarative input is a nested map of untyped values. `ConfigMap`
//! wraps one level of it with coercing accessors so factories can do all
//! validation up front and execution never sees malformed config.

use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

/// Factory-time configuration error
#[derive(Debug, Error)]
pub enum FactoryError {
    /// A required key is absent
    #[error("missing required key '{0}'")]
    MissingKey(String),

    /// A key holds a value of the wrong type
    #[error("key '{key}' expects {expected}")]
    BadType {
        /// Offending key
        key: String,
        /// Expected type description
        expected: &'static str,
    },

    /// A key holds a value that cannot be coerced
    #[error("key '{key}': {message}")]
    BadValue {
        /// Offending key
        key: String,
        /// Coercion failure detail
        message: String,
    },

    /// The type tag is not registered
    #[error("unknown type '{0}'")]
    UnknownType(String),
}

/// One level of declarative configuration with typed accessors
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    values: Map<String, Value>,
}

impl From<Map<String, Value>> for ConfigMap {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl ConfigMap {
    /// Raw access to the underlying map
    #[must_use]
    pub fn raw(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Get a value without coercion
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Required string
    pub fn require_str(&self, key: &str) -> Result<&str, FactoryError> {
        self.str_opt(key)?
            .ok_or_else(|| FactoryError::MissingKey(key.to_string()))
    }

    /// Optional string; present non-strings are an error
    pub fn str_opt(&self, key: &str) -> Result<Option<&str>, FactoryError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(FactoryError::BadType {
                key: key.to_string(),
                expected: "a string",
            }),
        }
    }

    /// String with a default
    pub fn str_or(&self, key: &str, default: &str) -> Result<String, FactoryError> {
        Ok(self.str_opt(key)?.unwrap_or(default).to_string())
    }

    /// Optional integer
    pub fn int_opt(&self, key: &str) -> Result<Option<i64>, FactoryError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or(FactoryError::BadType {
                key: key.to_string(),
                expected: "an integer",
            }),
            Some(_) => Err(FactoryError::BadType {
                key: key.to_string(),
                expected: "an integer",
            }),
        }
    }

    /// Boolean with a default
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, FactoryError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(FactoryError::BadType {
                key: key.to_string(),
                expected: "a boolean",
            }),
        }
    }

    /// Optional duration: a humantime string (`"30s"`) or a number of seconds
    pub fn duration_opt(&self, key: &str) -> Result<Option<Duration>, FactoryError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => humantime::parse_duration(s)
                .map(Some)
                .map_err(|e| FactoryError::BadValue {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|secs| Some(Duration::from_secs(secs)))
                .ok_or(FactoryError::BadType {
                    key: key.to_string(),
                    expected: "a duration string or whole seconds",
                }),
            Some(_) => Err(FactoryError::BadType {
                key: key.to_string(),
                expected: "a duration string or whole seconds",
            }),
        }
    }

    /// Optional list
    pub fn list_opt(&self, key: &str) -> Result<Option<&Vec<Value>>, FactoryError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(_) => Err(FactoryError::BadType {
                key: key.to_string(),
                expected: "a list",
            }),
        }
    }

    /// Optional nested map
    pub fn map_opt(&self, key: &str) -> Result<Option<&Map<String, Value>>, FactoryError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(FactoryError::BadType {
                key: key.to_string(),
                expected: "a map",
            }),
        }
    }

    /// Nested map, empty when absent
    pub fn map_or_empty(&self, key: &str) -> Result<Map<String, Value>, FactoryError> {
        Ok(self.map_opt(key)?.cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigMap {
        let values = serde_json::json!({
            "topic": "orders",
            "count": 3,
            "enabled": true,
            "timeout": "5s",
            "grace": 30,
            "values": {"a": 1},
            "items": [1, 2]
        });
        match values {
            Value::Object(map) => ConfigMap::from(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_require_str() {
        let cfg = sample();
        assert_eq!(cfg.require_str("topic").unwrap(), "orders");
        assert!(matches!(
            cfg.require_str("missing"),
            Err(FactoryError::MissingKey(_))
        ));
        assert!(matches!(
            cfg.require_str("count"),
            Err(FactoryError::BadType { .. })
        ));
    }

    #[test]
    fn test_duration_forms() {
        let cfg = sample();
        assert_eq!(
            cfg.duration_opt("timeout").unwrap(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            cfg.duration_opt("grace").unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(cfg.duration_opt("missing").unwrap(), None);
        assert!(cfg.duration_opt("enabled").is_err());
    }

    #[test]
    fn test_collections() {
        let cfg = sample();
        assert_eq!(cfg.list_opt("items").unwrap().unwrap().len(), 2);
        assert_eq!(cfg.map_or_empty("values").unwrap().len(), 1);
        assert!(cfg.map_or_empty("missing").unwrap().is_empty());
        assert!(cfg.map_opt("topic").is_err());
    }

    #[test]
    fn test_bool_and_int() {
        let cfg = sample();
        assert!(cfg.bool_or("enabled", false).unwrap());
        assert!(!cfg.bool_or("missing", false).unwrap());
        assert_eq!(cfg.int_opt("count").unwrap(), Some(3));
    }
}
