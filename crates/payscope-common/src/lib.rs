//! PayScope Common Library
//!
//! Shared types, utilities, and error handling for the PayScope workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used by both the ingestion
//! server and the processing worker:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Streaming SHA-256 used for artifact dedup
//! - **Logging**: Structured logging bootstrap (tracing)
//! - **Types**: Shared domain enums (file formats, job status, lifecycle)
//!
//! # Example
//!
//! ```no_run
//! use payscope_common::{Result, PayscopeError};
//! use payscope_common::checksum::Sha256Stream;
//!
//! fn hash_chunks(chunks: &[&[u8]]) -> String {
//!     let mut hasher = Sha256Stream::new();
//!     for chunk in chunks {
//!         hasher.update(chunk);
//!     }
//!     hasher.finish()
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PayscopeError, Result};
