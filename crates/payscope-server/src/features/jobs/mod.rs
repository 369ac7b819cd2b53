//! Parse job status feature

pub mod queries;
pub mod routes;
