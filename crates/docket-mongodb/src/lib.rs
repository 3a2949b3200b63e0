//! MongoDB data-access layer
//!
//! Docket wraps one MongoDB database behind a small CRUD façade:
//!
//! - a connection manager that retries forever with a fixed delay
//! - a registry of collection models gating every operation
//! - a policy of default fields forced into queries and records
//! - a validator for inserted records and update payloads
//! - a tagged error model (`{ type, message, field }`)
//!
//! ```rust,ignore
//! use docket_mongodb::{Docket, FieldType, FindFlags, Model, MongoConnector, QueryOptions};
//! use bson::doc;
//!
//! let docket = Docket::builder(MongoConnector::new())
//!     .model("users", Model::new().field("name", FieldType::String))
//!     .build();
//! docket.connect("mongodb://localhost:27017", "app").await;
//!
//! docket.insert("users", doc! { "name": "Ann" }).await?;
//! let users = docket
//!     .find("users", None, QueryOptions::new(), FindFlags::default())
//!     .await?;
//! ```

pub mod config;
pub mod connection;
pub mod defaults;
pub mod driver;
pub mod executor;
pub mod model;
pub mod object_id;
pub mod query;
pub mod validation;

pub use config::{ConfigError, DocketConfig};
pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy, DEFAULT_RECONNECT_DELAY};
pub use defaults::DefaultFieldPolicy;
pub use docket_common::{DocketError, DriverError, ErrorKind, ErrorMessage, Result};
#[cfg(any(test, feature = "test-util"))]
pub use driver::memory::{MemoryConnector, MemorySession};
pub use driver::mongo::{MongoConnector, MongoSession, PoolConfig};
pub use driver::{
    Cardinality, Connector, CursorOf, DeleteOutcome, InsertManyOutcome, Session, UpdateOutcome,
};
pub use executor::{is_not_connected, Docket, DocketBuilder, Records};
pub use model::{FieldType, Model, ModelRegistry};
pub use object_id::{parse_object_id, to_object_id};
pub use query::{FindFlags, FindMode, FindOutput, QueryOptions, FIND_MAX_TIME};
pub use validation::{Validator, Violation, ViolationReason};
