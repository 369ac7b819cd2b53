//! PayScope parse worker entry point
//!
//! Runs the queue-polling orchestrator. Extraction and mapping oracles
//! are mandatory for the worker to do anything useful; graph and vector
//! stores attach only when their endpoints are configured.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use payscope_common::logging::{init_logging, LogConfig};
use payscope_server::config::Config;
use payscope_server::db;
use payscope_server::oracles::http::{
    HttpEmbeddingOracle, HttpExtractionOracle, HttpMappingOracle,
};
use payscope_server::oracles::{EmbeddingOracle, FieldExtractionOracle, MappingOracle};
use payscope_server::persist::{GraphStore, HttpVectorStore, Neo4jGraphStore, VectorStore};
use payscope_server::queue::ParseQueue;
use payscope_server::storage::{config::StorageConfig, Storage};
use payscope_server::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if std::env::var("LOG_FILE_PREFIX").is_err() {
        log_config.log_file_prefix = "payscope-worker".to_string();
    }
    if log_config.filter_directives.is_none() {
        log_config.filter_directives = Some("payscope_server=debug,sqlx=info".to_string());
    }
    init_logging(&log_config)?;

    info!("Starting PayScope worker");

    let config = Config::load()?;
    let timeout = config.oracles.request_timeout_secs;

    let pool = db::create_pool(&config.database)
        .await
        .context("Connecting to database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Running migrations")?;

    let storage = Storage::new(StorageConfig::from_env()?)
        .await
        .context("Initializing object storage")?;

    let extraction_url = config
        .oracles
        .extraction_url
        .clone()
        .context("EXTRACTION_ORACLE_URL must be set for the worker")?;
    let mapping_url = config
        .oracles
        .mapping_url
        .clone()
        .context("MAPPING_ORACLE_URL must be set for the worker")?;

    let extraction: Arc<dyn FieldExtractionOracle> =
        Arc::new(HttpExtractionOracle::new(extraction_url, timeout)?);
    let mapping: Arc<dyn MappingOracle> = Arc::new(HttpMappingOracle::new(mapping_url, timeout)?);

    let embedder: Option<Arc<dyn EmbeddingOracle>> = match &config.oracles.embedding_url {
        Some(url) => Some(Arc::new(HttpEmbeddingOracle::new(url.clone(), timeout)?)),
        None => None,
    };
    let graph: Option<Arc<dyn GraphStore>> = match &config.oracles.graph_url {
        Some(url) => Some(Arc::new(Neo4jGraphStore::new(url.clone(), timeout)?)),
        None => None,
    };
    let vector: Option<Arc<dyn VectorStore>> = match &config.oracles.vector_url {
        Some(url) => Some(Arc::new(HttpVectorStore::new(url.clone(), timeout)?)),
        None => None,
    };

    if graph.is_none() {
        info!("GRAPH_STORE_URL unset; graph persistence disabled");
    }
    if embedder.is_none() || vector.is_none() {
        info!("Embedding or vector endpoint unset; vector persistence disabled");
    }

    let worker = Worker {
        queue: ParseQueue::new(pool.clone()),
        pool,
        storage,
        extraction,
        mapping,
        embedder,
        graph,
        vector,
        pipeline: config.pipeline.clone(),
    };

    worker.run().await;
    Ok(())
}
