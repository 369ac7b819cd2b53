//! Operator endpoints

pub mod queries;
pub mod routes;
