//! Process-local document store implementing the driver traits
//!
//! Supports the subset of MongoDB behaviour the executor relies on: equality
//! and comparison filters (`$eq $ne $gt $gte $lt $lte $in $nin $exists`,
//! `$and $or $nor`), the common update operators, and sort/skip/limit/
//! projection. Failures can be injected per operation and connection
//! attempts can be made to fail a fixed number of times.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use docket_common::DriverError;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use super::{
    Cardinality, Connector, DeleteOutcome, DriverResult, InsertManyOutcome, Session,
    UpdateOutcome,
};
use crate::query::QueryOptions;

/// Session operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Count,
    Find,
    InsertMany,
    Update,
    Delete,
    DropCollection,
    DropIndexes,
    Close,
}

#[derive(Debug, Default)]
struct Shared {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    injected: Mutex<Vec<(Operation, DriverError)>>,
    connect_failures: AtomicU32,
    connect_attempts: AtomicU32,
    calls: AtomicUsize,
}

impl Shared {
    /// Record a driver call and return an injected failure, if any
    fn enter(&self, operation: Operation) -> DriverResult<()> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        let mut injected = self.injected.lock();
        match injected.iter().position(|(op, _)| *op == operation) {
            Some(index) => Err(injected.remove(index).1),
            None => Ok(()),
        }
    }
}

/// Connector whose sessions all share one in-memory store
///
/// Clones share the same store, so a test can keep a handle for inspection
/// while the executor owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `attempts` connection attempts fail
    pub fn fail_connects(&self, attempts: u32) {
        self.shared.connect_failures.store(attempts, AtomicOrdering::SeqCst);
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: Operation, error: DriverError) {
        self.shared.injected.lock().push((operation, error));
    }

    /// Number of connection attempts so far, failed ones included
    pub fn connect_attempts(&self) -> u32 {
        self.shared.connect_attempts.load(AtomicOrdering::SeqCst)
    }

    /// Number of session operations invoked so far
    pub fn calls(&self) -> usize {
        self.shared.calls.load(AtomicOrdering::SeqCst)
    }

    /// Snapshot of a collection's documents in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.shared
            .collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a collection directly, bypassing validation
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        self.shared
            .collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(&self, url: &str, _database: &str) -> DriverResult<MemorySession> {
        self.shared.connect_attempts.fetch_add(1, AtomicOrdering::SeqCst);

        let remaining = self.shared.connect_failures.load(AtomicOrdering::SeqCst);
        if remaining > 0 {
            self.shared
                .connect_failures
                .store(remaining - 1, AtomicOrdering::SeqCst);
            return Err(DriverError::Other(format!("connection refused: {}", url)));
        }

        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        })
    }
}

/// Session over the shared in-memory store
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemorySession {
    fn enter(&self, operation: Operation) -> DriverResult<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(DriverError::Other("session is closed".to_string()));
        }
        self.shared.enter(operation)
    }

    fn select(&self, collection: &str, filter: &Document, options: &QueryOptions) -> Vec<Document> {
        let collections = self.shared.collections.lock();
        let mut matched: Vec<Document> = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| matches_filter(doc, filter)).cloned().collect())
            .unwrap_or_default();
        drop(collections);

        if let Some(sort) = options.get_sort() {
            matched.sort_by(|a, b| compare_by_sort(a, b, sort));
        }

        let skip = options.get_skip().unwrap_or(0) as usize;
        let mut selected: Vec<Document> = matched.into_iter().skip(skip).collect();

        if let Some(limit) = options.get_limit().filter(|limit| *limit != 0) {
            selected.truncate(limit.unsigned_abs() as usize);
        }

        if let Some(projection) = options.get_projection() {
            selected = selected.iter().map(|doc| project(doc, projection)).collect();
        }

        selected
    }
}

#[async_trait]
impl Session for MemorySession {
    type Cursor = std::vec::IntoIter<Document>;

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<u64> {
        self.enter(Operation::Count)?;
        let count_options = QueryOptions::new()
            .skip(options.get_skip().unwrap_or(0))
            .limit(options.get_limit().unwrap_or(0));
        Ok(self.select(collection, &filter, &count_options).len() as u64)
    }

    async fn find_cursor(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<Self::Cursor> {
        self.enter(Operation::Find)?;
        Ok(self.select(collection, &filter, options).into_iter())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<Vec<Document>> {
        self.enter(Operation::Find)?;
        Ok(self.select(collection, &filter, options))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DriverResult<InsertManyOutcome> {
        self.enter(Operation::InsertMany)?;
        if documents.is_empty() {
            return Err(DriverError::Other(
                "Invalid Operation, no operations specified".to_string(),
            ));
        }

        let mut inserted_ids = Vec::with_capacity(documents.len());
        let mut stored = Vec::with_capacity(documents.len());
        for document in documents {
            let document = with_id(document);
            inserted_ids.push(document.get("_id").cloned().unwrap_or(Bson::Null));
            stored.push(document);
        }

        self.shared
            .collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .extend(stored);

        Ok(InsertManyOutcome { inserted_ids })
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        cardinality: Cardinality,
    ) -> DriverResult<UpdateOutcome> {
        self.enter(Operation::Update)?;

        let mut collections = self.shared.collections.lock();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };

        let mut outcome = UpdateOutcome::default();
        for document in documents.iter_mut().filter(|doc| matches_filter(doc, &filter)) {
            let mut updated = document.clone();
            apply_update(&mut updated, &update)?;

            outcome.matched_count += 1;
            if updated != *document {
                *document = updated;
                outcome.modified_count += 1;
            }
            if cardinality == Cardinality::One {
                break;
            }
        }

        Ok(outcome)
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        cardinality: Cardinality,
    ) -> DriverResult<DeleteOutcome> {
        self.enter(Operation::Delete)?;

        let mut collections = self.shared.collections.lock();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(DeleteOutcome::default());
        };

        let before = documents.len();
        match cardinality {
            Cardinality::One => {
                if let Some(index) = documents.iter().position(|doc| matches_filter(doc, &filter)) {
                    documents.remove(index);
                }
            }
            Cardinality::Many => documents.retain(|doc| !matches_filter(doc, &filter)),
        }

        Ok(DeleteOutcome {
            deleted_count: (before - documents.len()) as u64,
        })
    }

    async fn drop_collection(&self, collection: &str) -> DriverResult<()> {
        self.enter(Operation::DropCollection)?;
        self.shared.collections.lock().remove(collection);
        Ok(())
    }

    async fn drop_indexes(&self, _collection: &str) -> DriverResult<()> {
        self.enter(Operation::DropIndexes)
    }

    async fn close(&self) -> DriverResult<()> {
        self.shared.enter(Operation::Close)?;
        if self.closed.swap(true, AtomicOrdering::SeqCst) {
            return Err(DriverError::Other("session is already closed".to_string()));
        }
        Ok(())
    }
}

/// Prepend a generated `_id` when the document has none
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut with_id = Document::new();
    with_id.insert("_id", ObjectId::new());
    with_id.extend(document);
    with_id
}

// =====================
// Filter matching
// =====================

/// Returns true if `doc` satisfies `filter`
fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => sub_filters(condition).all(|sub| matches_filter(doc, sub)),
        "$or" => sub_filters(condition).any(|sub| matches_filter(doc, sub)),
        "$nor" => !sub_filters(condition).any(|sub| matches_filter(doc, sub)),
        path => matches_condition(lookup(doc, path), condition),
    })
}

fn sub_filters(condition: &Bson) -> impl Iterator<Item = &Document> {
    condition
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Bson::as_document)
}

/// Resolve a dotted path inside a document
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

fn is_operator_document(condition: &Bson) -> bool {
    condition
        .as_document()
        .and_then(|doc| doc.keys().next())
        .is_some_and(|key| key.starts_with('$'))
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> bool {
    match condition.as_document() {
        Some(operators) if is_operator_document(condition) => operators
            .iter()
            .all(|(operator, argument)| matches_operator(value, operator, argument)),
        _ => value_equals(value, condition),
    }
}

fn matches_operator(value: Option<&Bson>, operator: &str, argument: &Bson) -> bool {
    match operator {
        "$eq" => value_equals(value, argument),
        "$ne" => !value_equals(value, argument),
        "$gt" => compare_value(value, argument, |ord| ord == Ordering::Greater),
        "$gte" => compare_value(value, argument, |ord| ord != Ordering::Less),
        "$lt" => compare_value(value, argument, |ord| ord == Ordering::Less),
        "$lte" => compare_value(value, argument, |ord| ord != Ordering::Greater),
        "$in" => argument
            .as_array()
            .is_some_and(|items| items.iter().any(|item| value_equals(value, item))),
        "$nin" => argument
            .as_array()
            .is_some_and(|items| !items.iter().any(|item| value_equals(value, item))),
        "$exists" => value.is_some() == argument.as_bool().unwrap_or(true),
        _ => false,
    }
}

/// Equality with array-contains semantics and numeric widening
fn value_equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| bson_equals(item, expected))
        }
        Some(value) => bson_equals(value, expected),
    }
}

fn bson_equals(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_value(value: Option<&Bson>, argument: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    value
        .and_then(|value| compare_bson(value, argument))
        .is_some_and(accept)
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn compare_bson(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_by_sort(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (path, direction) in sort {
        let descending = as_f64(direction).is_some_and(|d| d < 0.0);
        let ordering = match (lookup(a, path), lookup(b, path)) {
            (Some(x), Some(y)) => compare_bson(x, y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

/// Apply an inclusion or exclusion projection to top-level fields
fn project(doc: &Document, projection: &Document) -> Document {
    let inclusive = projection
        .iter()
        .any(|(field, flag)| field != "_id" && is_truthy(flag));

    if inclusive {
        let include_id = projection.get("_id").map_or(true, is_truthy);
        doc.iter()
            .filter(|(field, _)| {
                if *field == "_id" {
                    include_id
                } else {
                    projection.get(field.as_str()).is_some_and(is_truthy)
                }
            })
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    } else {
        doc.iter()
            .filter(|(field, _)| projection.get(field.as_str()).map_or(true, is_truthy))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }
}

// =====================
// Update operators
// =====================

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

fn numeric_op(
    current: &Bson,
    operand: &Bson,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Bson> {
    match (current, operand) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            let result = int_op(i64::from(*a), i64::from(*b))?;
            Some(i32::try_from(result).map_or(Bson::Int64(result), Bson::Int32))
        }
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            int_op(as_i64(current)?, as_i64(operand)?).map(Bson::Int64)
        }
        _ => Some(Bson::Double(float_op(as_f64(current)?, as_f64(operand)?))),
    }
}

fn zero_like(operand: &Bson) -> Bson {
    match operand {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Double(0.0),
    }
}

/// Apply an update document to `doc` in place
fn apply_update(doc: &mut Document, update: &Document) -> DriverResult<()> {
    if update.is_empty() || update.keys().any(|key| !key.starts_with('$')) {
        return Err(DriverError::Other(
            "Update document requires atomic operators".to_string(),
        ));
    }

    for (operator, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            DriverError::Other(format!(
                "Modifiers operate on fields but we found another type instead: {}",
                operator
            ))
        })?;

        for (field, operand) in fields {
            match operator.as_str() {
                "$set" => {
                    doc.insert(field.clone(), operand.clone());
                }
                "$unset" => {
                    doc.remove(field);
                }
                "$setOnInsert" => {}
                "$inc" | "$mul" => {
                    let current = match doc.get(field) {
                        Some(current) => current.clone(),
                        None if operator == "$inc" => zero_like(operand),
                        None => {
                            doc.insert(field.clone(), zero_like(operand));
                            continue;
                        }
                    };
                    let result = if operator == "$inc" {
                        numeric_op(&current, operand, i64::checked_add, |a, b| a + b)
                    } else {
                        numeric_op(&current, operand, i64::checked_mul, |a, b| a * b)
                    };
                    let result = result.ok_or_else(|| {
                        DriverError::Other(format!(
                            "Cannot apply {} to a value of non-numeric type in field '{}'",
                            operator, field
                        ))
                    })?;
                    doc.insert(field.clone(), result);
                }
                "$min" | "$max" => {
                    let wanted = if operator == "$min" { Ordering::Less } else { Ordering::Greater };
                    let replace = match doc.get(field) {
                        None => true,
                        Some(current) => compare_bson(operand, current) == Some(wanted),
                    };
                    if replace {
                        doc.insert(field.clone(), operand.clone());
                    }
                }
                "$push" => match doc.get_mut(field) {
                    Some(Bson::Array(items)) => items.push(operand.clone()),
                    Some(_) => {
                        return Err(DriverError::Other(format!(
                            "The field '{}' must be an array",
                            field
                        )))
                    }
                    None => {
                        doc.insert(field.clone(), Bson::Array(vec![operand.clone()]));
                    }
                },
                unknown => {
                    return Err(DriverError::Other(format!("Unknown modifier: {}", unknown)));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_equality_filter() {
        let doc = doc! { "name": "Ann", "age": 30, "tags": ["a", "b"] };
        assert!(matches_filter(&doc, &doc! {}));
        assert!(matches_filter(&doc, &doc! { "name": "Ann" }));
        assert!(matches_filter(&doc, &doc! { "age": 30.0 }));
        assert!(matches_filter(&doc, &doc! { "tags": "b" }));
        assert!(!matches_filter(&doc, &doc! { "name": "Bob" }));
        assert!(!matches_filter(&doc, &doc! { "email": "x" }));
        assert!(matches_filter(&doc, &doc! { "email": Bson::Null }));
    }

    #[test]
    fn test_operator_filter() {
        let doc = doc! { "age": 30, "profile": { "city": "Oslo" } };
        assert!(matches_filter(&doc, &doc! { "age": { "$gte": 18, "$lt": 65 } }));
        assert!(!matches_filter(&doc, &doc! { "age": { "$gt": 30 } }));
        assert!(matches_filter(&doc, &doc! { "age": { "$in": [10, 30] } }));
        assert!(matches_filter(&doc, &doc! { "age": { "$nin": [10] } }));
        assert!(matches_filter(&doc, &doc! { "email": { "$exists": false } }));
        assert!(matches_filter(&doc, &doc! { "profile.city": "Oslo" }));
    }

    #[test]
    fn test_logical_filter() {
        let doc = doc! { "name": "Ann", "age": 30 };
        assert!(matches_filter(&doc, &doc! { "$or": [{ "name": "Bob" }, { "age": 30 }] }));
        assert!(!matches_filter(&doc, &doc! { "$and": [{ "name": "Ann" }, { "age": 31 }] }));
        assert!(matches_filter(&doc, &doc! { "$nor": [{ "name": "Bob" }] }));
    }

    #[test]
    fn test_apply_update_operators() {
        let mut doc = doc! { "name": "Ann", "age": 30, "score": 2.5, "tags": ["a"] };
        apply_update(
            &mut doc,
            &doc! {
                "$set": { "name": "Anna" },
                "$inc": { "age": 1, "visits": 1 },
                "$mul": { "score": 2 },
                "$push": { "tags": "b" },
                "$unset": { "missing": "" },
            },
        )
        .unwrap();

        assert_eq!(doc.get_str("name").unwrap(), "Anna");
        assert_eq!(doc.get_i32("age").unwrap(), 31);
        assert_eq!(doc.get_i32("visits").unwrap(), 1);
        assert_eq!(doc.get_f64("score").unwrap(), 5.0);
        assert_eq!(doc.get_array("tags").unwrap().len(), 2);
    }

    #[test]
    fn test_apply_update_min_max() {
        let mut doc = doc! { "low": 5, "high": 5 };
        apply_update(&mut doc, &doc! { "$min": { "low": 3 }, "$max": { "high": 4 } }).unwrap();
        assert_eq!(doc.get_i32("low").unwrap(), 3);
        assert_eq!(doc.get_i32("high").unwrap(), 5);
    }

    #[test]
    fn test_apply_update_rejects_plain_document() {
        let mut doc = doc! { "name": "Ann" };
        assert!(apply_update(&mut doc, &doc! { "name": "Bob" }).is_err());
        assert!(apply_update(&mut doc, &doc! {}).is_err());
        assert!(apply_update(&mut doc, &doc! { "$rename": { "name": "n" } }).is_err());
    }

    #[test]
    fn test_apply_update_inc_non_numeric() {
        let mut doc = doc! { "name": "Ann" };
        let err = apply_update(&mut doc, &doc! { "$inc": { "name": 1 } }).unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn test_projection() {
        let doc = doc! { "_id": 1, "name": "Ann", "age": 30 };
        assert_eq!(project(&doc, &doc! { "name": 1 }), doc! { "_id": 1, "name": "Ann" });
        assert_eq!(project(&doc, &doc! { "name": 1, "_id": 0 }), doc! { "name": "Ann" });
        assert_eq!(project(&doc, &doc! { "age": 0 }), doc! { "_id": 1, "name": "Ann" });
    }

    #[tokio::test]
    async fn test_connect_failures_then_success() {
        let connector = MemoryConnector::new();
        connector.fail_connects(2);

        assert!(connector.connect("memory://", "db").await.is_err());
        assert!(connector.connect("memory://", "db").await.is_err());
        assert!(connector.connect("memory://", "db").await.is_ok());
        assert_eq!(connector.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_session_crud_and_injection() {
        let connector = MemoryConnector::new();
        let session = connector.connect("memory://", "db").await.unwrap();

        let outcome = session
            .insert_many("users", vec![doc! { "name": "Ann" }, doc! { "name": "Bob" }])
            .await
            .unwrap();
        assert_eq!(outcome.inserted_ids.len(), 2);

        let sorted = session
            .find("users", doc! {}, &QueryOptions::new().sort(doc! { "name": -1 }).limit(1))
            .await
            .unwrap();
        assert_eq!(sorted[0].get_str("name").unwrap(), "Bob");

        connector.fail_next(Operation::Count, DriverError::Other("boom".to_string()));
        assert!(session.count("users", doc! {}, &QueryOptions::new()).await.is_err());
        assert_eq!(session.count("users", doc! {}, &QueryOptions::new()).await.unwrap(), 2);

        let deleted = session
            .delete("users", doc! {}, Cardinality::Many)
            .await
            .unwrap();
        assert_eq!(deleted.deleted_count, 2);
        assert_eq!(connector.calls(), 5);
    }

    #[tokio::test]
    async fn test_close_twice_fails() {
        let session = MemoryConnector::new().connect("memory://", "db").await.unwrap();
        assert!(session.close().await.is_ok());
        assert!(session.close().await.is_err());
        assert!(session.find("users", doc! {}, &QueryOptions::new()).await.is_err());
    }
}
