use shared::models::Role;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Driver or admin logged out
    Logout,
    /// The authority rejected the credential
    Expired,
    /// A new login replaced the session
    Replaced,
}

/// Session lifecycle notifications
///
/// Views subscribe through [`super::SessionStore::subscribe`]; the
/// `LoginRequired` event is the navigation signal to the login surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established { user_id: String, role: Role, epoch: u64 },
    Ended { reason: EndReason, epoch: u64 },
    LoginRequired { role: Role, route: &'static str },
}
