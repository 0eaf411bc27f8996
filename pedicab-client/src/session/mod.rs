//! Session management
//!
//! [`SessionStore`] owns the credential; every other component reads the
//! session through a [`SessionScope`] captured before each remote call.

mod events;
mod storage;
mod store;

pub use events::{EndReason, SessionEvent};
pub use storage::{FileSessionStorage, MemorySessionStorage, ROLE_KEY, SessionStorage, TOKEN_KEY};
pub use store::{Credentials, Session, SessionScope, SessionStore};
