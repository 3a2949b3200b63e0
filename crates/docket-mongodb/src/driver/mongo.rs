//! MongoDB driver sessions with pool configuration

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    options::{ClientOptions, CountOptions, FindOptions, InsertManyOptions},
    Client, Collection, Cursor, Database,
};
use std::time::Duration;
use tracing::debug;

use super::{
    Cardinality, Connector, DeleteOutcome, DriverResult, InsertManyOutcome, Session,
    UpdateOutcome,
};
use crate::query::QueryOptions;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 0)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 10)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("docket".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(&self, client_options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &self.app_name {
            client_options.app_name = Some(app.clone());
        }
    }
}

/// Opens [`MongoSession`]s
#[derive(Debug, Clone, Default)]
pub struct MongoConnector {
    pool: PoolConfig,
}

impl MongoConnector {
    /// Create a connector with default pool settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with custom pool configuration
    pub fn with_config(pool: PoolConfig) -> Self {
        Self { pool }
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }
}

#[async_trait]
impl Connector for MongoConnector {
    type Session = MongoSession;

    async fn connect(&self, url: &str, database: &str) -> DriverResult<MongoSession> {
        let mut client_options = ClientOptions::parse(url).await?;
        self.pool.apply(&mut client_options);

        let client = Client::with_options(client_options)?;
        let database = client.database(database);

        // Server selection is lazy; ping so an unreachable server fails here
        database.run_command(doc! { "ping": 1 }).await?;

        Ok(MongoSession { client, database })
    }
}

/// A live MongoDB client bound to one database
#[derive(Debug, Clone)]
pub struct MongoSession {
    client: Client,
    database: Database,
}

impl MongoSession {
    /// Get a reference to the database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

fn find_options(options: &QueryOptions) -> FindOptions {
    let mut find_options = FindOptions::default();
    find_options.sort = options.get_sort().cloned();
    find_options.skip = options.get_skip();
    find_options.limit = options.get_limit();
    find_options.projection = options.get_projection().cloned();
    find_options.max_time = options.get_max_time();
    find_options
}

fn count_options(options: &QueryOptions) -> CountOptions {
    let mut count_options = CountOptions::default();
    count_options.skip = options.get_skip();
    count_options.limit = options.get_limit().map(i64::unsigned_abs);
    count_options.max_time = options.get_max_time();
    count_options
}

#[async_trait]
impl Session for MongoSession {
    type Cursor = Cursor<Document>;

    async fn count(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<u64> {
        let count = self
            .collection(collection)
            .count_documents(filter)
            .with_options(count_options(options))
            .await?;
        Ok(count)
    }

    async fn find_cursor(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<Cursor<Document>> {
        let cursor = self
            .collection(collection)
            .find(filter)
            .with_options(find_options(options))
            .await?;
        Ok(cursor)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: &QueryOptions,
    ) -> DriverResult<Vec<Document>> {
        let cursor = self.find_cursor(collection, filter, options).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DriverResult<InsertManyOutcome> {
        let options = InsertManyOptions::builder().ordered(false).build();
        let result = self
            .collection(collection)
            .insert_many(documents)
            .with_options(options)
            .await?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);

        Ok(InsertManyOutcome {
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        cardinality: Cardinality,
    ) -> DriverResult<UpdateOutcome> {
        let collection = self.collection(collection);
        let result = match cardinality {
            Cardinality::One => collection.update_one(filter, update).await?,
            Cardinality::Many => collection.update_many(filter, update).await?,
        };

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Document,
        cardinality: Cardinality,
    ) -> DriverResult<DeleteOutcome> {
        let collection = self.collection(collection);
        let result = match cardinality {
            Cardinality::One => collection.delete_one(filter).await?,
            Cardinality::Many => collection.delete_many(filter).await?,
        };

        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }

    async fn drop_collection(&self, collection: &str) -> DriverResult<()> {
        self.collection(collection).drop().await?;
        Ok(())
    }

    async fn drop_indexes(&self, collection: &str) -> DriverResult<()> {
        self.collection(collection).drop_indexes().await?;
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        debug!(database = %self.database.name(), "Shutting down MongoDB client");
        self.client.clone().shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, None);
        assert_eq!(config.max_pool_size, Some(10));
        assert_eq!(config.app_name, Some("docket".to_string()));
    }

    #[test]
    fn test_find_options_mapping() {
        let options = QueryOptions::new()
            .sort(doc! { "name": 1 })
            .skip(2)
            .limit(5)
            .max_time(Duration::from_millis(90_000));

        let mapped = find_options(&options);
        assert_eq!(mapped.sort, Some(doc! { "name": 1 }));
        assert_eq!(mapped.skip, Some(2));
        assert_eq!(mapped.limit, Some(5));
        assert_eq!(mapped.max_time, Some(Duration::from_millis(90_000)));
    }

    #[test]
    fn test_count_options_mapping() {
        let options = QueryOptions::new().skip(1).limit(-3);
        let mapped = count_options(&options);
        assert_eq!(mapped.skip, Some(1));
        assert_eq!(mapped.limit, Some(3));
        assert!(mapped.max_time.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires a running MongoDB; set MONGODB_URI
    async fn test_connect_and_ping() {
        let uri = std::env::var("MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let session = MongoConnector::new().connect(&uri, "docket_test").await.unwrap();
        assert_eq!(session.database().name(), "docket_test");
        session.close().await.unwrap();
    }
}
