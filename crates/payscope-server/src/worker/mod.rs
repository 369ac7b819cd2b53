//! Parse job orchestration
//!
//! Claiming, retrying, dead-lettering, and the pipeline itself. The
//! state machine lives in `claim`; the loop and pipeline in `runner`.

pub mod backoff;
pub mod claim;
pub mod dlq;
pub mod runner;

pub use runner::Worker;
