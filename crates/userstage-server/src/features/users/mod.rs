//! Users feature module
//!
//! Read access to replicated user rows.

pub mod queries;
pub mod routes;

pub use routes::users_routes;
