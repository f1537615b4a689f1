//! Uploads feature module
//!
//! Accepts user batches over HTTP, stages them, and schedules their replication.
//! Also lets an operator re-schedule a staged batch whose notification was lost.

pub mod commands;
pub mod routes;

pub use routes::uploads_routes;
