//! Upload commands

pub mod republish;
pub mod upload;

pub use republish::{RepublishCommand, RepublishError, RepublishResponse};
pub use upload::{UploadCommand, UploadError, UploadResponse, UploadSource};
