//! Data models
//!
//! Each model pairs a loosely-typed wire record (`*Record`) with the
//! validated domain type the client works with. Conversion goes through
//! `TryFrom`, never through field-by-field fallbacks at the call site.

pub mod earnings;
pub mod order;
pub mod presence;
pub mod role;
pub mod user;
pub mod withdrawal;

// Re-exports
pub use earnings::*;
pub use order::*;
pub use presence::*;
pub use role::*;
pub use user::*;
pub use withdrawal::*;
