//! Report upload feature

pub mod commands;
pub mod routes;
