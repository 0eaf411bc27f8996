//! Shared types for the pedicab dispatch client
//!
//! Wire records exchanged with the dispatch backend, the validated domain
//! models they decode into, and the error code table used across the
//! workspace.

pub mod client;
pub mod decode;
pub mod error;
pub mod models;
pub mod response;
pub mod util;

pub use decode::DecodeError;
pub use error::{ErrorCategory, ErrorCode};
pub use response::ApiResponse;
