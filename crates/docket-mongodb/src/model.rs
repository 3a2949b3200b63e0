//! Collection schemas and the model registry
//!
//! A [`Model`] is the flat schema of one collection: an ordered list of field
//! names, each with the [`FieldType`] its values must have on writes. Models
//! are usually derived from a *sentinel* document whose values only matter
//! through their BSON type (`{ name: "", age: 0 }` declares a string `name`
//! and a numeric `age`).

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::ConfigError;

/// Expected runtime type of a model field
///
/// Types are compared by class, not by exact BSON type: every numeric type is
/// a `Number`, and documents, arrays, `null`, dates, ids and every other
/// structured BSON value are all an `Object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// Int32, Int64, Double and Decimal128 values
    Number,
    Boolean,
    Object,
}

impl FieldType {
    /// Classify a BSON value; `None` only for the deprecated `undefined`
    pub fn of(value: &Bson) -> Option<FieldType> {
        match value {
            Bson::String(_) | Bson::Symbol(_) => Some(FieldType::String),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
                Some(FieldType::Number)
            }
            Bson::Boolean(_) => Some(FieldType::Boolean),
            Bson::Undefined => None,
            // documents, arrays, null, dates, ids, binary, regex, code, ...
            _ => Some(FieldType::Object),
        }
    }

    /// Returns true if `value` has this type
    pub fn matches(&self, value: &Bson) -> bool {
        FieldType::of(value) == Some(*self)
    }

    /// Get the human-readable type name
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Flat schema of one collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    fields: Vec<(String, FieldType)>,
}

impl Model {
    /// Create an empty model (every write field is rejected)
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field, replacing any earlier declaration of the same name
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = field_type,
            None => self.fields.push((name, field_type)),
        }
        self
    }

    /// Build a model from a sentinel document
    ///
    /// # Errors
    /// Returns `ConfigError::UnsupportedFieldType` if a sentinel value has a
    /// BSON type that cannot be declared (`undefined`).
    pub fn from_sentinel(sentinel: &Document) -> Result<Self, ConfigError> {
        let mut model = Model::new();
        for (name, value) in sentinel {
            let field_type =
                FieldType::of(value).ok_or_else(|| ConfigError::UnsupportedFieldType {
                    field: name.clone(),
                    found: format!("{:?}", value.element_type()),
                })?;
            model = model.field(name.clone(), field_type);
        }
        Ok(model)
    }

    /// Declared type of a field, if the field exists
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, field_type)| *field_type)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_type(name).is_some()
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(name, field_type)| (name.as_str(), *field_type))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Registry of collection name → model
///
/// Built once at construction time; registration is the only gate deciding
/// whether a collection may be touched at all.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Model>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model for a collection
    pub fn with_model(mut self, collection: impl Into<String>, model: Model) -> Self {
        self.models.insert(collection.into(), model);
        self
    }

    /// Build a registry from a document of collection name → sentinel document
    pub fn from_sentinels(sentinels: &Document) -> Result<Self, ConfigError> {
        let mut registry = ModelRegistry::new();
        for (collection, sentinel) in sentinels {
            let sentinel = sentinel.as_document().ok_or_else(|| ConfigError::ModelNotDocument {
                collection: collection.clone(),
            })?;
            registry = registry.with_model(collection.clone(), Model::from_sentinel(sentinel)?);
        }
        Ok(registry)
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn model_for(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    /// Registered collection names, sorted
    pub fn collection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl FromIterator<(String, Model)> for ModelRegistry {
    fn from_iter<I: IntoIterator<Item = (String, Model)>>(iter: I) -> Self {
        Self {
            models: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_field_type_numbers_share_a_tag() {
        assert_eq!(FieldType::of(&Bson::Int32(1)), Some(FieldType::Number));
        assert_eq!(FieldType::of(&Bson::Int64(1)), Some(FieldType::Number));
        assert_eq!(FieldType::of(&Bson::Double(1.5)), Some(FieldType::Number));
        assert!(FieldType::Number.matches(&Bson::Int64(30)));
        assert!(!FieldType::Number.matches(&Bson::String("30".to_string())));
    }

    #[test]
    fn test_field_type_structured_values_share_a_tag() {
        let regex = Bson::RegularExpression(bson::Regex {
            pattern: "^a".to_string(),
            options: String::new(),
        });
        let structured = [
            Bson::Document(doc! { "id": 1 }),
            Bson::Array(vec![Bson::Int32(1)]),
            Bson::Null,
            Bson::DateTime(bson::DateTime::now()),
            Bson::ObjectId(ObjectId::new()),
            regex,
        ];
        for value in &structured {
            assert_eq!(FieldType::of(value), Some(FieldType::Object), "{:?}", value);
        }
        assert_eq!(FieldType::of(&Bson::Undefined), None);
        assert!(!FieldType::Object.matches(&Bson::Undefined));
    }

    #[test]
    fn test_model_from_sentinel() {
        let model = Model::from_sentinel(&doc! {
            "name": "",
            "age": 0,
            "active": false,
            "tags": [],
            "owner": ObjectId::new(),
        })
        .unwrap();

        assert_eq!(model.len(), 5);
        assert_eq!(model.field_type("name"), Some(FieldType::String));
        assert_eq!(model.field_type("age"), Some(FieldType::Number));
        assert_eq!(model.field_type("active"), Some(FieldType::Boolean));
        assert_eq!(model.field_type("tags"), Some(FieldType::Object));
        assert_eq!(model.field_type("owner"), Some(FieldType::Object));
        assert!(!model.has_field("email"));
    }

    #[test]
    fn test_model_preserves_declaration_order() {
        let model = Model::new()
            .field("b", FieldType::String)
            .field("a", FieldType::Number)
            .field("b", FieldType::Boolean);

        let fields: Vec<_> = model.fields().collect();
        assert_eq!(fields, vec![("b", FieldType::Boolean), ("a", FieldType::Number)]);
    }

    #[test]
    fn test_model_rejects_unsupported_sentinel() {
        let sentinel = doc! { "at": Bson::Undefined };
        let err = Model::from_sentinel(&sentinel).unwrap_err();
        assert!(err.to_string().contains("at"));
    }

    #[test]
    fn test_registry_from_sentinels() {
        let registry = ModelRegistry::from_sentinels(&doc! {
            "users": { "name": "", "age": 0 },
            "posts": { "title": "" },
        })
        .unwrap();

        assert!(registry.has_collection("users"));
        assert!(registry.has_collection("posts"));
        assert!(!registry.has_collection("comments"));
        assert_eq!(registry.collection_names(), vec!["posts", "users"]);
        assert_eq!(
            registry.model_for("users").and_then(|m| m.field_type("age")),
            Some(FieldType::Number)
        );
    }

    #[test]
    fn test_registry_rejects_non_document_model() {
        let err = ModelRegistry::from_sentinels(&doc! { "users": 5 }).unwrap_err();
        assert!(matches!(err, ConfigError::ModelNotDocument { .. }));
    }
}
