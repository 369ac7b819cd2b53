//! HTTP feature slices
//!
//! Each feature owns its commands/queries and routes, mirroring the
//! vertical-slice layout of the rest of the API surface.

pub mod admin;
pub mod jobs;
pub mod uploads;
