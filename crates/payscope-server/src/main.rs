//! PayScope API server entry point

use anyhow::Result;
use payscope_common::logging::{init_logging, LogConfig};
use tracing::info;

use payscope_server::{api, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if std::env::var("LOG_FILE_PREFIX").is_err() {
        log_config.log_file_prefix = "payscope-server".to_string();
    }
    if log_config.filter_directives.is_none() {
        log_config.filter_directives =
            Some("payscope_server=debug,tower_http=debug,sqlx=info".to_string());
    }
    init_logging(&log_config)?;

    info!("Starting PayScope server");

    let config = Config::load()?;
    api::serve(config).await
}
