//! ObjectId conversion for query values

use bson::{oid::ObjectId, Bson};
use docket_common::{DocketError, ErrorKind, Result};

/// Parse one hex string into an ObjectId
pub fn parse_object_id(value: &str) -> Result<ObjectId> {
    ObjectId::parse_str(value).map_err(|err| {
        DocketError::new(
            ErrorKind::ObjectId,
            format!("Invalid ObjectId '{}': {}", value, err),
        )
    })
}

fn convert_one(value: Bson) -> Result<Bson> {
    match value {
        Bson::String(hex) => parse_object_id(&hex).map(Bson::ObjectId),
        Bson::ObjectId(_) => Ok(value),
        other => Err(DocketError::new(
            ErrorKind::ObjectId,
            format!("Cannot convert {:?} value to ObjectId", other.element_type()),
        )),
    }
}

fn is_falsy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined | Bson::Boolean(false) => true,
        Bson::String(text) => text.is_empty(),
        Bson::Int32(number) => *number == 0,
        Bson::Int64(number) => *number == 0,
        Bson::Double(number) => *number == 0.0 || number.is_nan(),
        _ => false,
    }
}

/// Convert an id or a list of ids to ObjectIds
///
/// - a hex string becomes an `ObjectId`
/// - an array becomes a new array with every element converted
/// - falsy values (`Null`, `Undefined`, `false`, zero, NaN and the empty
///   string) are returned unchanged
/// - an `ObjectId` is returned unchanged
///
/// # Errors
/// `objectIdError` for malformed hex strings or values of other types.
pub fn to_object_id(ids: Bson) -> Result<Bson> {
    if is_falsy(&ids) {
        return Ok(ids);
    }
    match ids {
        Bson::Array(items) => items
            .into_iter()
            .map(convert_one)
            .collect::<Result<Vec<_>>>()
            .map(Bson::Array),
        other => convert_one(other),
    }
}
