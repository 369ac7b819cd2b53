//! HTTP API surface
//!
//! Wires the feature routers onto shared state (pool, object storage,
//! parse queue) and serves them. Request tracing and CORS sit on the
//! outermost layer.

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::features;
use crate::queue::ParseQueue;
use crate::storage::{self, Storage};

/// Uploaded payment reports can be large scanned PDFs
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Storage,
    pub queue: ParseQueue,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(features::uploads::routes::upload_reports))
        .route(
            "/jobs/by-artifact/:artifact_id",
            get(features::jobs::routes::get_job_by_artifact),
        )
        .route(
            "/admin/validation/counts",
            get(features::admin::routes::validation_counts),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    db::health_check(&state.db)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Build state from config, run migrations, and serve until shutdown.
pub async fn serve(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let pool = db::create_pool(&config.database)
        .await
        .context("Connecting to database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Running migrations")?;

    let storage = Storage::new(storage::config::StorageConfig::from_env()?)
        .await
        .context("Initializing object storage")?;

    let queue = ParseQueue::new(pool.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        db: pool,
        storage,
        queue,
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Binding {addr}"))?;
    info!("Listening on {addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }
}
