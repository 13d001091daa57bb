//! # Policy Memory
//!
//! The mapping a policy threads through an episode. It starts empty at every
//! reset, is handed to each invocation as the second argument, and is
//! replaced by whatever the invocation leaves in that binding.

use crate::error::{self, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of top-level keys (prevents unbounded growth)
pub const MAX_KEYS: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyMemory {
    entries: Map<String, Value>,
}

impl PolicyMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt the value a policy returned as its memory.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(entries) if entries.len() > MAX_KEYS => Err(Error::policy_execution(format!(
                "memory holds {} keys, more than the {} allowed",
                entries.len(),
                MAX_KEYS
            ))
            .with_context("keys", entries.len().to_string())),
            Value::Object(entries) => Ok(Self { entries }),
            other => Err(error::type_mismatch("RETURN", "memory object", &other)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= MAX_KEYS {
            return Err(Error::policy_execution(format!("memory is full ({} keys)", MAX_KEYS))
                .with_context("key", key));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.entries.clone())
    }

    /// Compact JSON, used when reporting memory back to the collaborator
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_from_value_requires_object() {
        let memory = PolicyMemory::from_value(json!({"visited": [[0, 0]]})).unwrap();
        assert_eq!(memory.get("visited"), Some(&json!([[0, 0]])));

        let err = PolicyMemory::from_value(json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyExecution);
        assert!(err.message().contains("array"));
    }

    #[test]
    fn test_set_and_clear() {
        let mut memory = PolicyMemory::new();
        assert!(memory.is_empty());
        memory.set("steps", json!(3)).unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.to_json(), r#"{"steps":3}"#);
        memory.clear();
        assert_eq!(memory.to_value(), json!({}));
    }

    #[test]
    fn test_key_limit() {
        let mut memory = PolicyMemory::new();
        for i in 0..MAX_KEYS {
            memory.set(format!("k{}", i), json!(i)).unwrap();
        }
        assert!(memory.set("one_more", json!(0)).is_err());
        // Overwriting an existing key is still allowed
        memory.set("k0", json!("again")).unwrap();
    }
}
