//! Docket CLI
//!
//! Usage:
//!   docket ping                                   Connect and report the server state
//!   docket find users '{"name": "Ann"}' --limit 5 Query a collection
//!   docket find users --cursor                    Stream matches one per line
//!   docket count users '{"age": {"$gt": 30}}'     Count matches
//!   docket insert users '[{"name": "Ann"}]'       Insert one record or a batch
//!   docket update-one users '{..}' '{"$set": ..}' Update the first match
//!   docket update-many users '{..}' '{"$inc": ..}'
//!   docket delete-one users '{..}'
//!   docket delete-many users '{..}'
//!   docket drop-collection users
//!   docket drop-indexes users
//!   docket object-id '["507f1f77bcf86cd799439011"]'
//!
//! Configuration comes from `--config` (YAML or JSON), then
//! `DOCKET_MONGODB_URI` / `DOCKET_MONGODB_DATABASE` (a `.env` file is read
//! first), then `--url` / `--database`.

mod json;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docket_mongodb::{
    Docket, DocketConfig, DocketError, FindFlags, FindOutput, MongoConnector, QueryOptions,
};
use futures::TryStreamExt;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Schema-checked MongoDB client", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (.yaml, .yml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// MongoDB connection string
    #[arg(long, global = true)]
    url: Option<String>,

    /// Database name
    #[arg(long, global = true)]
    database: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct QueryArgs {
    /// Collection name
    collection: String,

    /// Filter as extended JSON
    filter: Option<String>,

    /// Sort specification as extended JSON
    #[arg(long)]
    sort: Option<String>,

    #[arg(long)]
    skip: Option<u64>,

    #[arg(long)]
    limit: Option<i64>,

    /// Projection as extended JSON
    #[arg(long)]
    projection: Option<String>,
}

impl QueryArgs {
    fn options(&self) -> Result<QueryOptions> {
        let mut options = QueryOptions::new();
        if let Some(sort) = json::parse_optional_document(self.sort.as_deref())? {
            options = options.sort(sort);
        }
        if let Some(skip) = self.skip {
            options = options.skip(skip);
        }
        if let Some(limit) = self.limit {
            options = options.limit(limit);
        }
        if let Some(projection) = json::parse_optional_document(self.projection.as_deref())? {
            options = options.projection(projection);
        }
        Ok(options)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the server and disconnect again
    Ping,

    /// Query a collection
    Find {
        #[command(flatten)]
        query: QueryArgs,

        /// Stream matches without a time limit, one JSON document per line
        #[arg(long)]
        cursor: bool,
    },

    /// Count the documents matching a filter
    Count {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Insert one record or an array of records
    Insert {
        collection: String,
        records: String,
    },

    /// Update the first document matching a filter
    UpdateOne {
        collection: String,
        filter: String,
        update: String,
    },

    /// Update every document matching a filter
    UpdateMany {
        collection: String,
        filter: String,
        update: String,
    },

    /// Delete the first document matching a filter
    DeleteOne {
        collection: String,
        filter: String,
    },

    /// Delete every document matching a filter
    DeleteMany {
        collection: String,
        filter: String,
    },

    /// Drop a collection
    DropCollection { collection: String },

    /// Drop all indexes of a collection
    DropIndexes { collection: String },

    /// Convert a hex id or an array of hex ids to ObjectIds
    ObjectId { ids: String },
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("docket_mongodb={level},docket={level}")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

fn load_config(cli: &Cli) -> Result<DocketConfig> {
    let mut config = match &cli.config {
        Some(path) => DocketConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DocketConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    Ok(config)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // Conversion needs no database
    if let Commands::ObjectId { ids } = &cli.command {
        let converted = docket_mongodb::to_object_id(json::parse_bson(ids)?)?;
        return print_json(&json::render(converted));
    }

    let config = load_config(&cli)?;
    let connector = MongoConnector::with_config(config.pool_config());
    let docket = Docket::from_config(connector, &config)?;

    debug!(collections = ?docket.registry().collection_names(), "Loaded models");
    docket.connect(&config.url, &config.database).await;

    let result = execute(&docket, cli.command).await;

    if let Err(err) = docket.disconnect().await {
        debug!(error = %err, "Disconnect failed");
    }
    result
}

async fn execute(docket: &Docket<MongoConnector>, command: Commands) -> Result<()> {
    match command {
        Commands::Ping => {
            info!(state = ?docket.state(), "Server reachable");
            print_json(&serde_json::json!({ "ok": 1 }))
        }

        Commands::Find { query, cursor } => {
            let filter = json::parse_optional_document(query.filter.as_deref())?;
            let flags = if cursor { FindFlags::cursor() } else { FindFlags::default() };
            let output = docket
                .find(&query.collection, filter, query.options()?, flags)
                .await?;

            match output {
                FindOutput::Cursor(mut cursor) => {
                    while let Some(document) = cursor.try_next().await? {
                        println!("{}", json::render(document));
                    }
                    Ok(())
                }
                FindOutput::Documents(documents) => {
                    let documents: Vec<_> = documents.into_iter().map(json::render).collect();
                    print_json(&serde_json::Value::Array(documents))
                }
                FindOutput::Count(count) => print_json(&serde_json::json!({ "count": count })),
            }
        }

        Commands::Count { query } => {
            let filter = json::parse_optional_document(query.filter.as_deref())?;
            let output = docket
                .find(&query.collection, filter, query.options()?, FindFlags::count())
                .await?;
            print_json(&serde_json::json!({ "count": output.into_count() }))
        }

        Commands::Insert {
            collection,
            records,
        } => {
            let records = json::parse_documents(&records)?;
            let outcome = docket.insert(&collection, records).await?;
            let ids: Vec<_> = outcome.inserted_ids.into_iter().map(json::render).collect();
            print_json(&serde_json::json!({ "insertedIds": ids }))
        }

        Commands::UpdateOne {
            collection,
            filter,
            update,
        } => {
            let outcome = docket
                .update_one(
                    &collection,
                    json::parse_document(&filter)?,
                    json::parse_document(&update)?,
                )
                .await?;
            print_json(&serde_json::json!({
                "matchedCount": outcome.matched_count,
                "modifiedCount": outcome.modified_count,
            }))
        }

        Commands::UpdateMany {
            collection,
            filter,
            update,
        } => {
            let outcome = docket
                .update_many(
                    &collection,
                    json::parse_document(&filter)?,
                    json::parse_document(&update)?,
                )
                .await?;
            print_json(&serde_json::json!({
                "matchedCount": outcome.matched_count,
                "modifiedCount": outcome.modified_count,
            }))
        }

        Commands::DeleteOne { collection, filter } => {
            let outcome = docket
                .delete_one(&collection, json::parse_document(&filter)?)
                .await?;
            print_json(&serde_json::json!({ "deletedCount": outcome.deleted_count }))
        }

        Commands::DeleteMany { collection, filter } => {
            let outcome = docket
                .delete_many(&collection, json::parse_document(&filter)?)
                .await?;
            print_json(&serde_json::json!({ "deletedCount": outcome.deleted_count }))
        }

        Commands::DropCollection { collection } => {
            docket.drop_collection(&collection).await?;
            print_json(&serde_json::json!({ "ok": 1 }))
        }

        Commands::DropIndexes { collection } => {
            docket.drop_indexes(&collection).await?;
            print_json(&serde_json::json!({ "ok": 1 }))
        }

        Commands::ObjectId { ids } => {
            let converted = docket.to_object_id(json::parse_bson(&ids)?)?;
            print_json(&json::render(converted))
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<DocketError>() {
            Some(docket_err) => match serde_json::to_string_pretty(docket_err) {
                Ok(rendered) => eprintln!("{}", rendered),
                Err(_) => eprintln!("{}", docket_err),
            },
            None => eprintln!("Error: {:#}", err),
        }
        std::process::exit(1);
    }
}
