//! Driver seam
//!
//! The executor never talks to a database directly. A [`Connector`] opens a
//! [`Session`], and the session performs the raw collection operations. Two
//! implementations ship with the crate: [`mongo`] over the official MongoDB
//! driver and `memory`, a process-local store used by the test suites and
//! compiled only with the `test-util` feature.

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use bson::{Bson, Document};
use docket_common::DriverError;

use crate::query::QueryOptions;

/// Result type for raw driver calls
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Whether a write targets the first match or all matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Result of an unordered multi-document insert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyOutcome {
    /// Ids of the inserted documents, in input order
    pub inserted_ids: Vec<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// An open database session
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Raw cursor type handed out by `find` in cursor mode
    type Cursor: Send;

    /// Count documents matching the filter
    async fn count(&self, collection: &str, filter: Document, options: &QueryOptions)
        -> DriverResult<u64>;

    /// Open a cursor over the matching documents
    async fn find_cursor(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<Self::Cursor>;

    /// Fetch all matching documents
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<Vec<Document>>;

    /// Insert documents without ordering guarantees
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DriverResult<InsertManyOutcome>;

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        cardinality: Cardinality,
    ) -> DriverResult<UpdateOutcome>;

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        cardinality: Cardinality,
    ) -> DriverResult<DeleteOutcome>;

    async fn drop_collection(&self, collection: &str) -> DriverResult<()>;

    async fn drop_indexes(&self, collection: &str) -> DriverResult<()>;

    /// Close the session
    async fn close(&self) -> DriverResult<()>;
}

/// Opens sessions against a database server
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    async fn connect(&self, url: &str, database: &str) -> DriverResult<Self::Session>;
}

/// Cursor type produced by a connector's sessions
pub type CursorOf<C> = <<C as Connector>::Session as Session>::Cursor;
