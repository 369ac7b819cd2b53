//! Configuration management

use serde::{Deserialize, Serialize};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/payscope";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default confidence threshold below which oracle mappings are dropped
/// and lifecycle classifications rejected.
pub const DEFAULT_MAPPING_CONFIDENCE_THRESHOLD: f64 = 0.70;

/// Default maximum parse attempts before dead-lettering.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff cap in seconds.
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 300;

/// Default worker poll interval when the queue is empty, in milliseconds.
pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub oracles: OracleConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Pipeline tuning: confidence gating, retry policy, worker cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mapping_confidence_threshold: f64,
    pub max_retries: u32,
    pub backoff_cap_secs: u64,
    pub worker_poll_interval_ms: u64,
}

/// Endpoints for the external oracles and secondary stores.
///
/// Graph/vector persistence is skipped when the corresponding endpoint is
/// unset, mirroring how deployments bring stores online one at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub extraction_url: Option<String>,
    pub mapping_url: Option<String>,
    pub embedding_url: Option<String>,
    pub graph_url: Option<String>,
    pub vector_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("PAYSCOPE_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("PAYSCOPE_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: std::env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            pipeline: PipelineConfig {
                mapping_confidence_threshold: std::env::var("MAPPING_CONFIDENCE_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAPPING_CONFIDENCE_THRESHOLD),
                max_retries: std::env::var("PARSE_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_RETRIES),
                backoff_cap_secs: std::env::var("PARSE_BACKOFF_CAP_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_BACKOFF_CAP_SECS),
                worker_poll_interval_ms: std::env::var("WORKER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_WORKER_POLL_INTERVAL_MS),
            },
            oracles: OracleConfig {
                extraction_url: std::env::var("EXTRACTION_ORACLE_URL").ok(),
                mapping_url: std::env::var("MAPPING_ORACLE_URL").ok(),
                embedding_url: std::env::var("EMBEDDING_ORACLE_URL").ok(),
                graph_url: std::env::var("GRAPH_STORE_URL").ok(),
                vector_url: std::env::var("VECTOR_STORE_URL").ok(),
                request_timeout_secs: std::env::var("ORACLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if !(0.0..=1.0).contains(&self.pipeline.mapping_confidence_threshold) {
            anyhow::bail!(
                "mapping_confidence_threshold must be within [0, 1], got {}",
                self.pipeline.mapping_confidence_threshold
            );
        }

        if self.pipeline.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            pipeline: PipelineConfig::default(),
            oracles: OracleConfig {
                extraction_url: None,
                mapping_url: None,
                embedding_url: None,
                graph_url: None,
                vector_url: None,
                request_timeout_secs: 60,
            },
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mapping_confidence_threshold: DEFAULT_MAPPING_CONFIDENCE_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_cap_secs: DEFAULT_BACKOFF_CAP_SECS,
            worker_poll_interval_ms: DEFAULT_WORKER_POLL_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = Config::default();
        config.pipeline.mapping_confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_connections_exceeding_max_rejected() {
        let mut config = Config::default();
        config.database.min_connections = 50;
        config.database.max_connections = 10;
        assert!(config.validate().is_err());
    }
}
