//! CRUD dispatcher
//!
//! [`Docket`] is the public entry point. Every operation first checks that
//! the collection is registered, then borrows the active session and
//! delegates to the driver. Local failures (unknown collection, schema
//! mismatch) never reach the driver.

use bson::{Bson, DateTime, Document};
use docket_common::{DocketError, DriverError, ErrorKind, Result};
use std::sync::Arc;
use tracing::debug;

use crate::config::{ConfigError, DocketConfig};
use crate::connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
use crate::defaults::DefaultFieldPolicy;
use crate::driver::{
    Cardinality, Connector, CursorOf, DeleteOutcome, InsertManyOutcome, Session, UpdateOutcome,
};
use crate::model::{Model, ModelRegistry};
use crate::query::{FindFlags, FindMode, FindOutput, QueryOptions, FIND_MAX_TIME};
use crate::validation::Validator;

/// One record or a batch of records to insert
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    One(Document),
    Many(Vec<Document>),
}

impl Records {
    fn into_vec(self) -> Vec<Document> {
        match self {
            Records::One(record) => vec![record],
            Records::Many(records) => records,
        }
    }
}

impl From<Document> for Records {
    fn from(record: Document) -> Self {
        Records::One(record)
    }
}

impl From<Vec<Document>> for Records {
    fn from(records: Vec<Document>) -> Self {
        Records::Many(records)
    }
}

/// Builder for [`Docket`]
pub struct DocketBuilder<C: Connector> {
    connector: C,
    registry: ModelRegistry,
    defaults: DefaultFieldPolicy,
    policy: ReconnectPolicy,
}

impl<C: Connector> DocketBuilder<C> {
    /// Replace the whole model registry
    pub fn registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register one collection
    pub fn model(mut self, collection: impl Into<String>, model: Model) -> Self {
        self.registry = self.registry.with_model(collection, model);
        self
    }

    pub fn default_query_part(mut self, defaults: DefaultFieldPolicy) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Docket<C> {
        Docket {
            connection: ConnectionManager::new(self.connector, self.policy),
            registry: Arc::new(self.registry),
            defaults: Arc::new(self.defaults),
        }
    }
}

/// Data-access façade over one database
pub struct Docket<C: Connector> {
    connection: ConnectionManager<C>,
    registry: Arc<ModelRegistry>,
    defaults: Arc<DefaultFieldPolicy>,
}

impl<C: Connector> std::fmt::Debug for Docket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Docket")
            .field("connection", &self.connection)
            .field("collections", &self.registry.collection_names())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl<C: Connector> Docket<C> {
    pub fn builder(connector: C) -> DocketBuilder<C> {
        DocketBuilder {
            connector,
            registry: ModelRegistry::new(),
            defaults: DefaultFieldPolicy::new(),
            policy: ReconnectPolicy::default(),
        }
    }

    /// Build from a loaded configuration
    pub fn from_config(connector: C, config: &DocketConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self::builder(connector)
            .registry(config.registry()?)
            .default_query_part(config.default_query_part.clone())
            .reconnect_policy(config.reconnect_policy())
            .build())
    }

    /// Open the session, retrying until the server is reachable
    pub async fn connect(&self, url: &str, database: &str) -> Arc<C::Session> {
        self.connection.connect(url, database).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn defaults(&self) -> &DefaultFieldPolicy {
        &self.defaults
    }

    fn ensure_registered(&self, collection: &str, kind: ErrorKind) -> Result<&Model> {
        self.registry
            .model_for(collection)
            .ok_or_else(|| DocketError::collection_not_found(kind, collection))
    }

    fn session(&self, kind: ErrorKind) -> Result<Arc<C::Session>> {
        self.connection
            .session()
            .map_err(|err| DocketError::driver(kind, err))
    }

    /// Query a collection
    ///
    /// Default-policy fields are forced into the query. `flags.count` returns
    /// the number of matches, `flags.cursor` the raw cursor without a time
    /// limit, otherwise the matches are collected with a 90 s limit.
    pub async fn find(
        &self,
        collection: &str,
        query: Option<Document>,
        options: QueryOptions,
        flags: FindFlags,
    ) -> Result<FindOutput<CursorOf<C>>> {
        self.ensure_registered(collection, ErrorKind::FindCollection)?;

        let mut filter = query.unwrap_or_default();
        self.defaults.apply(&mut filter);

        let mode = flags.mode();
        debug!(collection, ?mode, "find");

        match mode {
            FindMode::Count => {
                let session = self.session(ErrorKind::FindCount)?;
                let count = session
                    .count(collection, filter, &options)
                    .await
                    .map_err(|err| DocketError::driver(ErrorKind::FindCount, err))?;
                Ok(FindOutput::Count(count))
            }
            FindMode::Cursor => {
                let session = self.session(ErrorKind::FindCursor)?;
                let cursor = session
                    .find_cursor(collection, filter, &options)
                    .await
                    .map_err(|err| DocketError::driver(ErrorKind::FindCursor, err))?;
                Ok(FindOutput::Cursor(cursor))
            }
            FindMode::Documents => {
                let session = self.session(ErrorKind::Find)?;
                let options = options.max_time(FIND_MAX_TIME);
                let documents = session
                    .find(collection, filter, &options)
                    .await
                    .map_err(|err| DocketError::driver(ErrorKind::Find, err))?;
                Ok(FindOutput::Documents(documents))
            }
        }
    }

    /// Validate and insert one record or a batch
    ///
    /// The whole batch is rejected if any record is invalid. Stored records
    /// carry `created_at` and every default-policy field.
    pub async fn insert(
        &self,
        collection: &str,
        records: impl Into<Records>,
    ) -> Result<InsertManyOutcome> {
        let model = self.ensure_registered(collection, ErrorKind::InsertCollection)?;
        let validator = Validator::new(model, &self.defaults);

        let now = DateTime::now();
        let items = records
            .into()
            .into_vec()
            .iter()
            .map(|record| {
                validator.record(record, now).map_err(|violation| {
                    DocketError::invalid_field(ErrorKind::InsertValidate, collection, &violation.field)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(collection, count = items.len(), "insert");

        let session = self.session(ErrorKind::InsertInsertMany)?;
        session
            .insert_many(collection, items)
            .await
            .map_err(|err| DocketError::driver(ErrorKind::InsertInsertMany, err))
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        cardinality: Cardinality,
    ) -> Result<UpdateOutcome> {
        let model = self.ensure_registered(collection, ErrorKind::UpdateCollection)?;

        if update.is_empty() || update.keys().any(|key| !key.starts_with('$')) {
            return Err(DocketError::new(
                ErrorKind::Update,
                "Update document requires atomic operators",
            ));
        }

        Validator::new(model, &self.defaults)
            .update(&update)
            .map_err(|violation| {
                DocketError::invalid_field(ErrorKind::UpdateValidate, collection, &violation.field)
            })?;

        let session = self.session(ErrorKind::Update)?;
        let kind = match cardinality {
            Cardinality::One => ErrorKind::UpdateUpdateOne,
            Cardinality::Many => ErrorKind::UpdateUpdateMany,
        };

        debug!(collection, ?cardinality, "update");

        session
            .update(collection, filter, update, cardinality)
            .await
            .map_err(|err| DocketError::driver(kind, err))
    }

    /// Update the first matching document
    ///
    /// Every failure is reported as `updateOneError` wrapping the cause.
    pub async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        self.update(collection, filter, update, Cardinality::One)
            .await
            .map_err(|err| DocketError::wrap(ErrorKind::UpdateOne, err))
    }

    /// Update every matching document
    ///
    /// Every failure is reported as `updateManyError` wrapping the cause.
    pub async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        self.update(collection, filter, update, Cardinality::Many)
            .await
            .map_err(|err| DocketError::wrap(ErrorKind::UpdateMany, err))
    }

    pub async fn delete_one(&self, collection: &str, filter: Document) -> Result<DeleteOutcome> {
        self.ensure_registered(collection, ErrorKind::DeleteOneCollection)?;
        let session = self.session(ErrorKind::DeleteOne)?;

        debug!(collection, "delete_one");
        session
            .delete(collection, filter, Cardinality::One)
            .await
            .map_err(|err| DocketError::driver(ErrorKind::DeleteOne, err))
    }

    pub async fn delete_many(&self, collection: &str, filter: Document) -> Result<DeleteOutcome> {
        self.ensure_registered(collection, ErrorKind::DeleteManyCollection)?;
        let session = self.session(ErrorKind::DeleteMany)?;

        debug!(collection, "delete_many");
        session
            .delete(collection, filter, Cardinality::Many)
            .await
            .map_err(|err| DocketError::driver(ErrorKind::DeleteMany, err))
    }

    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.ensure_registered(collection, ErrorKind::DropCollection)?;
        let session = self.session(ErrorKind::Drop)?;

        debug!(collection, "drop_collection");
        session
            .drop_collection(collection)
            .await
            .map_err(|err| DocketError::driver(ErrorKind::Drop, err))
    }

    pub async fn drop_indexes(&self, collection: &str) -> Result<()> {
        self.ensure_registered(collection, ErrorKind::DropIndexCollection)?;
        let session = self.session(ErrorKind::DropIndex)?;

        debug!(collection, "drop_indexes");
        session
            .drop_indexes(collection)
            .await
            .map_err(|err| DocketError::driver(ErrorKind::DropIndex, err))
    }

    /// See [`crate::object_id::to_object_id`]
    pub fn to_object_id(&self, ids: Bson) -> Result<Bson> {
        crate::object_id::to_object_id(ids)
    }
}

/// `true` when the error means no session was open
pub fn is_not_connected(err: &DocketError) -> bool {
    matches!(err.root().driver_error(), Some(DriverError::NotConnected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryConnector;
    use crate::model::FieldType;
    use bson::doc;

    fn users() -> Model {
        Model::new()
            .field("name", FieldType::String)
            .field("age", FieldType::Number)
    }

    async fn connected(connector: &MemoryConnector) -> Docket<MemoryConnector> {
        let docket = Docket::builder(connector.clone())
            .model("users", users())
            .default_query_part(DefaultFieldPolicy::new().with_default("status", "active"))
            .build();
        docket.connect("memory://", "app").await;
        docket
    }

    #[test]
    fn test_records_conversion() {
        assert_eq!(Records::from(doc! { "a": 1 }).into_vec().len(), 1);
        assert_eq!(Records::from(vec![doc! {}, doc! {}]).into_vec().len(), 2);
    }

    #[tokio::test]
    async fn test_find_forces_default_fields() {
        let connector = MemoryConnector::new();
        connector.seed(
            "users",
            vec![
                doc! { "name": "Ann", "status": "active" },
                doc! { "name": "Ann", "status": "banned" },
            ],
        );
        let docket = connected(&connector).await;

        let documents = docket
            .find("users", Some(doc! { "name": "Ann", "status": "banned" }), QueryOptions::new(), FindFlags::default())
            .await
            .unwrap()
            .into_documents()
            .unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].get_str("status").unwrap(), "active");
    }

    #[tokio::test]
    async fn test_count_wins_over_cursor() {
        let connector = MemoryConnector::new();
        connector.seed("users", vec![doc! { "status": "active" }, doc! { "status": "active" }]);
        let docket = connected(&connector).await;

        let flags = FindFlags { count: true, cursor: true };
        let output = docket.find("users", None, QueryOptions::new(), flags).await.unwrap();
        assert_eq!(output.into_count(), Some(2));
    }

    #[tokio::test]
    async fn test_unknown_update_shape_is_update_error() {
        let connector = MemoryConnector::new();
        let docket = connected(&connector).await;

        let err = docket
            .update_one("users", doc! {}, doc! { "name": "Ann" })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpdateOne);
        assert_eq!(err.inner().unwrap().kind(), ErrorKind::Update);
    }

    #[tokio::test]
    async fn test_not_connected_kinds() {
        let docket = Docket::builder(MemoryConnector::new()).model("users", users()).build();

        let err = docket.delete_one("users", doc! {}).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeleteOne);
        assert!(is_not_connected(&err));

        let err = docket
            .update_many("users", doc! {}, doc! { "$set": { "age": 3 } })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpdateMany);
        assert_eq!(err.inner().unwrap().kind(), ErrorKind::Update);
        assert!(is_not_connected(&err));
    }

    #[test]
    fn test_from_config() {
        let config = DocketConfig::from_yaml_str(
            "models:\n  users: { name: \"\" }\ndefaultQueryPart:\n  status: { default: active }\n",
        )
        .unwrap();
        let docket = Docket::from_config(MemoryConnector::new(), &config).unwrap();
        assert!(docket.registry().has_collection("users"));
        assert!(docket.defaults().is_default_field("status"));
        assert_eq!(docket.state(), ConnectionState::Disconnected);
    }
}
