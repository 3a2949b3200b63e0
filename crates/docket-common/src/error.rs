//! Error types for docket
//!
//! Every failure is reported as a [`DocketError`]: a discriminant naming the
//! failure site, a message (plain text, a raw driver error, or a nested
//! `DocketError`) and, for schema violations, the offending field.

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Result type alias for docket operations
pub type Result<T> = std::result::Result<T, DocketError>;

/// Failure reported by the underlying database driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("No active database session")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Driver error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for DriverError {
    fn from(err: mongodb::error::Error) -> Self {
        DriverError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for DriverError {
    fn from(err: bson::ser::Error) -> Self {
        DriverError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for DriverError {
    fn from(err: bson::de::Error) -> Self {
        DriverError::Serialization(format!("BSON deserialization error: {}", err))
    }
}

/// Discriminant of a [`DocketError`], one per failure site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Disconnect,
    DropIndexCollection,
    DropIndex,
    FindCollection,
    FindCount,
    FindCursor,
    Find,
    InsertCollection,
    InsertValidate,
    InsertInsertMany,
    UpdateCollection,
    UpdateValidate,
    UpdateUpdateOne,
    UpdateUpdateMany,
    Update,
    UpdateOne,
    UpdateMany,
    DeleteOneCollection,
    DeleteOne,
    DeleteManyCollection,
    DeleteMany,
    DropCollection,
    Drop,
    ObjectId,
}

impl ErrorKind {
    /// Wire name of the discriminant, e.g. `insertValidateError`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Disconnect => "disconnectError",
            ErrorKind::DropIndexCollection => "dropIndexCollectionError",
            ErrorKind::DropIndex => "dropIndexError",
            ErrorKind::FindCollection => "findCollectionError",
            ErrorKind::FindCount => "findCountError",
            ErrorKind::FindCursor => "findCursorError",
            ErrorKind::Find => "findError",
            ErrorKind::InsertCollection => "insertCollectionError",
            ErrorKind::InsertValidate => "insertValidateError",
            ErrorKind::InsertInsertMany => "insertInsertManyError",
            ErrorKind::UpdateCollection => "updateCollectionError",
            ErrorKind::UpdateValidate => "updateValidateError",
            ErrorKind::UpdateUpdateOne => "updateUpdateOneError",
            ErrorKind::UpdateUpdateMany => "updateUpdateManyError",
            ErrorKind::Update => "updateError",
            ErrorKind::UpdateOne => "updateOneError",
            ErrorKind::UpdateMany => "updateManyError",
            ErrorKind::DeleteOneCollection => "deleteOneCollectionError",
            ErrorKind::DeleteOne => "deleteOneError",
            ErrorKind::DeleteManyCollection => "deleteManyCollectionError",
            ErrorKind::DeleteMany => "deleteManyError",
            ErrorKind::DropCollection => "dropCollectionError",
            ErrorKind::Drop => "dropError",
            ErrorKind::ObjectId => "objectIdError",
        }
    }

    /// Returns true for the collection-registration gate failures
    pub fn is_collection_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::DropIndexCollection
                | ErrorKind::FindCollection
                | ErrorKind::InsertCollection
                | ErrorKind::UpdateCollection
                | ErrorKind::DeleteOneCollection
                | ErrorKind::DeleteManyCollection
                | ErrorKind::DropCollection
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Payload carried in the `message` slot of a [`DocketError`]
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorMessage {
    /// Locally produced description
    Text(String),
    /// Raw error returned by the driver
    Driver(DriverError),
    /// Error re-wrapped by an outer operation
    Nested(Box<DocketError>),
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMessage::Text(text) => f.write_str(text),
            ErrorMessage::Driver(err) => write!(f, "{}", err),
            ErrorMessage::Nested(inner) => write!(f, "{}", inner),
        }
    }
}

impl Serialize for ErrorMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ErrorMessage::Text(text) => serializer.serialize_str(text),
            ErrorMessage::Driver(err) => serializer.collect_str(err),
            ErrorMessage::Nested(inner) => inner.serialize(serializer),
        }
    }
}

/// Structured error returned by every docket operation
///
/// Serializes to `{ "type": ..., "message": ..., "field"?: ... }`.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{kind}: {message}")]
pub struct DocketError {
    #[serde(rename = "type")]
    kind: ErrorKind,
    message: ErrorMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

impl DocketError {
    /// Create an error with a plain text message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: ErrorMessage::Text(message.into()),
            field: None,
        }
    }

    /// Collection is not present in the model registry
    pub fn collection_not_found(kind: ErrorKind, collection: &str) -> Self {
        Self::new(kind, format!("Collection - {} not found", collection))
    }

    /// Field is unknown to the model or has the wrong type
    pub fn invalid_field(kind: ErrorKind, collection: &str, field: &str) -> Self {
        Self {
            kind,
            message: ErrorMessage::Text(format!(
                "Error in collection - {}. Field - \"{}\" incorrect or type field is invalid.",
                collection, field
            )),
            field: Some(field.to_string()),
        }
    }

    /// Wrap a raw driver failure
    pub fn driver(kind: ErrorKind, err: DriverError) -> Self {
        Self {
            kind,
            message: ErrorMessage::Driver(err),
            field: None,
        }
    }

    /// Re-wrap an inner error under an outer discriminant
    pub fn wrap(kind: ErrorKind, inner: DocketError) -> Self {
        Self {
            kind,
            message: ErrorMessage::Nested(Box::new(inner)),
            field: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &ErrorMessage {
        &self.message
    }

    /// Offending field for schema violations
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// The wrapped error, if this error re-wraps another one
    pub fn inner(&self) -> Option<&DocketError> {
        match &self.message {
            ErrorMessage::Nested(inner) => Some(inner),
            _ => None,
        }
    }

    /// The raw driver error, if this error wraps one
    pub fn driver_error(&self) -> Option<&DriverError> {
        match &self.message {
            ErrorMessage::Driver(err) => Some(err),
            _ => None,
        }
    }

    /// Innermost error of a chain of wrapped errors
    pub fn root(&self) -> &DocketError {
        let mut current = self;
        while let Some(inner) = current.inner() {
            current = inner;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(ErrorKind::Disconnect.as_str(), "disconnectError");
        assert_eq!(ErrorKind::InsertInsertMany.as_str(), "insertInsertManyError");
        assert_eq!(ErrorKind::UpdateUpdateMany.to_string(), "updateUpdateManyError");
        assert_eq!(ErrorKind::Drop.as_str(), "dropError");
    }

    #[test]
    fn test_collection_error_kinds() {
        assert!(ErrorKind::FindCollection.is_collection_error());
        assert!(ErrorKind::DeleteManyCollection.is_collection_error());
        assert!(!ErrorKind::Find.is_collection_error());
        assert!(!ErrorKind::InsertValidate.is_collection_error());
    }

    #[test]
    fn test_collection_not_found_display() {
        let err = DocketError::collection_not_found(ErrorKind::FindCollection, "ghosts");
        assert_eq!(err.to_string(), "findCollectionError: Collection - ghosts not found");
        assert!(err.field().is_none());
    }

    #[test]
    fn test_invalid_field_carries_field() {
        let err = DocketError::invalid_field(ErrorKind::InsertValidate, "users", "age");
        assert_eq!(err.kind(), ErrorKind::InsertValidate);
        assert_eq!(err.field(), Some("age"));
        assert_eq!(
            err.message().to_string(),
            "Error in collection - users. Field - \"age\" incorrect or type field is invalid."
        );
    }

    #[test]
    fn test_driver_error_display() {
        let err = DocketError::driver(ErrorKind::Find, DriverError::MongoDB("timeout".to_string()));
        assert_eq!(err.to_string(), "findError: MongoDB error: timeout");
        assert_eq!(err.driver_error(), Some(&DriverError::MongoDB("timeout".to_string())));
    }

    #[test]
    fn test_wrapped_error_chain() {
        let inner = DocketError::invalid_field(ErrorKind::UpdateValidate, "users", "age");
        let outer = DocketError::wrap(ErrorKind::UpdateOne, inner.clone());
        assert_eq!(outer.kind(), ErrorKind::UpdateOne);
        assert_eq!(outer.inner(), Some(&inner));
        assert_eq!(outer.root().kind(), ErrorKind::UpdateValidate);
        assert!(outer.field().is_none());
    }

    #[test]
    fn test_serialize_plain_error() {
        let err = DocketError::collection_not_found(ErrorKind::InsertCollection, "ghosts");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(
            value,
            json!({ "type": "insertCollectionError", "message": "Collection - ghosts not found" })
        );
    }

    #[test]
    fn test_serialize_nested_error() {
        let inner = DocketError::invalid_field(ErrorKind::UpdateValidate, "users", "age");
        let outer = DocketError::wrap(ErrorKind::UpdateMany, inner);
        let value = serde_json::to_value(&outer).unwrap();
        assert_eq!(value["type"], "updateManyError");
        assert_eq!(value["message"]["type"], "updateValidateError");
        assert_eq!(value["message"]["field"], "age");
        assert!(value.get("field").is_none());
    }

    #[test]
    fn test_serialize_driver_error() {
        let err = DocketError::driver(ErrorKind::Disconnect, DriverError::NotConnected);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["message"], "No active database session");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: DriverError = json_err.into();
        assert!(matches!(err, DriverError::Serialization(_)));
    }
}
