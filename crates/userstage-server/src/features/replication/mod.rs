//! Replication admin feature module
//!
//! Exposes dead-lettered messages for manual inspection.

pub mod queries;
pub mod routes;

pub use routes::replication_routes;
