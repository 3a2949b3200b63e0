//! Extended JSON arguments and output

use anyhow::{bail, Context, Result};
use bson::{Bson, Document};

/// Parse an extended JSON argument into BSON
pub fn parse_bson(input: &str) -> Result<Bson> {
    let value: serde_json::Value =
        serde_json::from_str(input).with_context(|| format!("Invalid JSON: {}", input))?;
    Bson::try_from(value).with_context(|| format!("Invalid extended JSON: {}", input))
}

/// Parse an extended JSON object
pub fn parse_document(input: &str) -> Result<Document> {
    match parse_bson(input)? {
        Bson::Document(document) => Ok(document),
        other => bail!("Expected a JSON object, got {:?}", other.element_type()),
    }
}

/// Parse one object or an array of objects
pub fn parse_documents(input: &str) -> Result<Vec<Document>> {
    match parse_bson(input)? {
        Bson::Document(document) => Ok(vec![document]),
        Bson::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Bson::Document(document) => Ok(document),
                other => bail!("Element {} is not an object: {:?}", index, other.element_type()),
            })
            .collect(),
        other => bail!("Expected an object or an array, got {:?}", other.element_type()),
    }
}

pub fn parse_optional_document(input: Option<&str>) -> Result<Option<Document>> {
    input.map(parse_document).transpose()
}

/// Render BSON as relaxed extended JSON
pub fn render(value: impl Into<Bson>) -> serde_json::Value {
    value.into().into_relaxed_extjson()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_parse_document_with_extended_types() {
        let document =
            parse_document(r#"{"_id": {"$oid": "507f1f77bcf86cd799439011"}, "age": 30}"#).unwrap();
        assert_eq!(
            document.get_object_id("_id").unwrap(),
            ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap()
        );
        assert_eq!(document.get("age"), Some(&Bson::Int32(30)));
    }

    #[test]
    fn test_parse_documents_accepts_one_or_many() {
        assert_eq!(parse_documents(r#"{"a": 1}"#).unwrap().len(), 1);
        assert_eq!(parse_documents(r#"[{"a": 1}, {"a": 2}]"#).unwrap().len(), 2);
        assert!(parse_documents(r#"[{"a": 1}, 2]"#).is_err());
        assert!(parse_documents("42").is_err());
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_document("[1, 2]").is_err());
        assert!(parse_document("{not json").is_err());
        assert_eq!(parse_optional_document(None).unwrap(), None);
    }

    #[test]
    fn test_render_relaxed() {
        let rendered = render(doc! { "name": "Ann", "age": 30_i64 });
        assert_eq!(rendered, serde_json::json!({ "name": "Ann", "age": 30 }));
    }
}
