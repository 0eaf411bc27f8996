//! Error codes for the dispatch client
//!
//! - [`ErrorCode`]: numeric codes surfaced to the views
//! - [`ErrorCategory`]: classification of codes by range
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Driver / presence errors
//! - 4xxx: Order errors
//! - 5xxx: Withdrawal errors
//! - 9xxx: System errors

mod category;
mod codes;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
