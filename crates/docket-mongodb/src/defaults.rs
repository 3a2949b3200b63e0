//! Default query part: fields managed entirely by configuration
//!
//! Every field of the policy is forced to its configured value in each `find`
//! query and each inserted record. Callers can never override them, and the
//! validator never type-checks them.

use bson::{Bson, Document};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;

/// Configured `{ default: <value> }` entry of one field
#[derive(Debug, Clone, Deserialize)]
struct DefaultFieldSpec {
    default: Bson,
}

/// Ordered set of always-present fields and their values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultFieldPolicy {
    defaults: Document,
}

impl DefaultFieldPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field with its default value
    pub fn with_default(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    pub fn is_default_field(&self, field: &str) -> bool {
        self.defaults.contains_key(field)
    }

    pub fn default_for(&self, field: &str) -> Option<&Bson> {
        self.defaults.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.defaults.iter().map(|(field, value)| (field.as_str(), value))
    }

    /// Overwrite every policy field in `target` with its default
    pub fn apply(&self, target: &mut Document) {
        for (field, value) in &self.defaults {
            target.insert(field.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.defaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }
}

impl<'de> Deserialize<'de> for DefaultFieldPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PolicyVisitor;

        impl<'de> Visitor<'de> for PolicyVisitor {
            type Value = DefaultFieldPolicy;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field name to { default: <value> }")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut policy = DefaultFieldPolicy::new();
                while let Some((field, spec)) = map.next_entry::<String, DefaultFieldSpec>()? {
                    policy.defaults.insert(field, spec.default);
                }
                Ok(policy)
            }
        }

        deserializer.deserialize_map(PolicyVisitor)
    }
}
