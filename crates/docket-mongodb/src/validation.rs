//! Write validation against collection models
//!
//! Two entry points, both pure:
//! - [`Validator::record`] checks a record to insert and produces the item
//!   that is actually stored (`created_at` and default fields injected).
//! - [`Validator::update`] checks the field maps of the recognised update
//!   operators. Other operators are passed through unchecked.
//!
//! Validation stops at the first offending field.

use bson::{Bson, DateTime, Document};
use thiserror::Error;

use crate::defaults::DefaultFieldPolicy;
use crate::model::{FieldType, Model};

/// Timestamp field injected into every inserted record
pub const CREATED_AT: &str = "created_at";

/// Update operators whose field maps are validated
pub const CHECKED_UPDATE_OPERATORS: &[&str] =
    &["$inc", "$min", "$max", "$mul", "$set", "$setOnInsert"];

/// Why a field was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationReason {
    /// The model does not declare the field
    UnknownField,
    /// The value's type differs from the declared one
    TypeMismatch {
        expected: FieldType,
        found: &'static str,
    },
}

/// First invalid field of a record or update payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field '{field}' is invalid: {reason:?}")]
pub struct Violation {
    pub field: String,
    pub reason: ViolationReason,
}

/// Returns true if the operator's field map is type-checked
pub fn is_checked_operator(operator: &str) -> bool {
    operator.starts_with('$') && CHECKED_UPDATE_OPERATORS.contains(&operator)
}

/// Get the type class name for diagnostics
fn bson_type_name(value: &Bson) -> &'static str {
    FieldType::of(value).map_or("undefined", |field_type| field_type.name())
}

/// Validates writes for one collection
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    model: &'a Model,
    defaults: &'a DefaultFieldPolicy,
}

impl<'a> Validator<'a> {
    pub fn new(model: &'a Model, defaults: &'a DefaultFieldPolicy) -> Self {
        Self { model, defaults }
    }

    /// Existence and type check of a single field
    fn check_field(&self, field: &str, value: &Bson) -> Result<(), Violation> {
        let expected = self.model.field_type(field).ok_or_else(|| Violation {
            field: field.to_string(),
            reason: ViolationReason::UnknownField,
        })?;

        if expected.matches(value) {
            Ok(())
        } else {
            Err(Violation {
                field: field.to_string(),
                reason: ViolationReason::TypeMismatch {
                    expected,
                    found: bson_type_name(value),
                },
            })
        }
    }

    /// Validate a record and build the document to store
    ///
    /// Caller values for default-policy fields are dropped, `created_at` is
    /// set to `now`, then every default-policy field is set to its default.
    pub fn record(&self, record: &Document, now: DateTime) -> Result<Document, Violation> {
        let mut item = Document::new();

        for (field, value) in record {
            if self.defaults.is_default_field(field) {
                continue;
            }
            self.check_field(field, value)?;
            item.insert(field.clone(), value.clone());
        }

        item.insert(CREATED_AT, now);
        self.defaults.apply(&mut item);

        Ok(item)
    }

    /// Validate the recognised operators of an update payload
    ///
    /// `created_at` and default-policy fields are exempt. Operators outside
    /// [`CHECKED_UPDATE_OPERATORS`] (`$unset`, `$push`, ...) and operator
    /// values that are not documents are not inspected.
    pub fn update(&self, update: &Document) -> Result<(), Violation> {
        for (operator, fields) in update {
            if !is_checked_operator(operator) {
                continue;
            }
            let Bson::Document(fields) = fields else {
                continue;
            };

            for (field, value) in fields {
                if field == CREATED_AT || self.defaults.is_default_field(field) {
                    continue;
                }
                self.check_field(field, value)?;
            }
        }

        Ok(())
    }
}
