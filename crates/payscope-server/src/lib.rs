//! PayScope Server Library
//!
//! Ingestion and processing core for uploaded payment report files
//! (PDF/CSV/XLSX). Uploaded artifacts are deduplicated by content checksum,
//! parsed exactly once per distinct checksum, normalized into canonical
//! transaction facts, and persisted across heterogeneous stores.
//!
//! # Architecture
//!
//! - **Artifact Registry** (`features::uploads`): checksum-dedup intake;
//!   raw bytes go to object storage, metadata to Postgres, and parse work
//!   is enqueued exactly once per distinct checksum.
//! - **Parse Queue** (`queue`): Postgres-backed at-least-once task queue
//!   consumed by the worker binary.
//! - **Job Orchestrator** (`worker`): atomic claim of a ParseJob row,
//!   pipeline execution, retry backoff with full jitter, dead-lettering.
//! - **Normalization Engine** (`normalize`): maps extracted document
//!   structure into validated, deduplicated `TransactionFact`s via the
//!   mapping oracle.
//! - **Lifecycle Reconciler** (`reconcile`): pure cross-stage anomaly
//!   detection (AUTH -> CLEARING -> SETTLEMENT).
//! - **Persistence Coordinator** (`persist`): tenant-isolated relational +
//!   time-series writes (system of record), idempotent graph MERGE, and
//!   idempotent vector upserts.
//!
//! External models (field extraction, column mapping, embeddings) sit
//! behind narrow typed contracts in `oracles`; the core never depends on a
//! specific model backend.
//!
//! # Framework Stack
//!
//! - **Axum**: upload API surface
//! - **SQLx**: Postgres system of record and queue coordination
//! - **aws-sdk-s3**: raw artifact object storage

pub mod api;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod features;
pub mod models;
pub mod normalize;
pub mod oracles;
pub mod persist;
pub mod queue;
pub mod reconcile;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use error::{AppError, AppResult};
