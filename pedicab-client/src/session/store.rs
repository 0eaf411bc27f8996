// pedicab-client/src/session/store.rs
// 会话管理 - 登录、恢复、登出与鉴权失效处理

use super::events::{EndReason, SessionEvent};
use super::storage::{ROLE_KEY, SessionStorage, TOKEN_KEY};
use crate::http::DispatchApi;
use crate::{ClientError, ClientResult};
use shared::ErrorCode;
use shared::client::LoginRequest;
use shared::models::{Role, UserInfo};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// An authenticated session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    pub role: Role,
    pub user: UserInfo,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn display_name(&self) -> &str {
        &self.user.name
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("role", &self.role)
            .field("user", &self.user)
            .finish()
    }
}

/// Login form input
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Identity captured by an async operation before it suspends
///
/// Results are merged only while [`SessionStore::is_current`] still holds
/// for the captured epoch.
#[derive(Debug, Clone)]
pub struct SessionScope {
    pub epoch: u64,
    pub role: Role,
    pub user: UserInfo,
    pub cancel: CancellationToken,
}

impl SessionScope {
    pub fn driver_key(&self) -> &str {
        self.user.driver_key()
    }
}

struct SessionState {
    session: Option<Session>,
    epoch: u64,
    cancel: CancellationToken,
}

/// Owns the authentication credential and the active session
pub struct SessionStore {
    api: Arc<dyn DispatchApi>,
    storage: Arc<dyn SessionStorage>,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(api: Arc<dyn DispatchApi>, storage: Arc<dyn SessionStorage>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            api,
            storage,
            state: RwLock::new(SessionState {
                session: None,
                epoch: 0,
                cancel: CancellationToken::new(),
            }),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current session
    pub fn current(&self) -> Option<Session> {
        self.read().session.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Identity of the current session, if any
    pub fn scope(&self) -> Option<SessionScope> {
        let state = self.read();
        state.session.as_ref().map(|session| SessionScope {
            epoch: state.epoch,
            role: session.role,
            user: session.user.clone(),
            cancel: state.cancel.clone(),
        })
    }

    /// Driver-only scope; admins and anonymous callers get `NoSession`
    pub fn driver_scope(&self) -> ClientResult<SessionScope> {
        match self.scope() {
            Some(scope) if scope.role == Role::Driver => Ok(scope),
            Some(_) => Err(ClientError::Forbidden(
                ErrorCode::DriverRequired.message().to_string(),
            )),
            None => Err(ClientError::NoSession),
        }
    }

    /// Whether a session captured at `epoch` is still the live one
    pub fn is_current(&self, epoch: u64) -> bool {
        let state = self.read();
        state.session.is_some() && state.epoch == epoch
    }

    /// Validate the persisted credential against the authority
    ///
    /// Never fails: any problem clears the persisted credential and yields
    /// `None`.
    pub async fn restore(&self) -> Option<Session> {
        let token = match self.storage.get(TOKEN_KEY) {
            Ok(Some(token)) if !token.trim().is_empty() => token,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted session");
                return None;
            }
        };

        if let Some(session) = self.current()
            && session.token == token
        {
            return Some(session);
        }

        let epoch = self.epoch();
        self.api.set_token(Some(token.clone()));
        let user = match self.api.profile().await {
            Ok(record) => UserInfo::try_from(record).map_err(ClientError::from),
            Err(e) => Err(e),
        };

        // login() or logout() ran while the profile call was in flight
        if self.epoch() != epoch {
            return self.current();
        }

        match user {
            Ok(user) => {
                if let Err(e) = self.storage.set(ROLE_KEY, user.role.as_str()) {
                    tracing::warn!(error = %e, "Failed to persist role tag");
                }
                let session = Session {
                    token,
                    role: user.role,
                    user,
                };
                tracing::info!(user_id = %session.user.id, role = %session.role, "Session restored");
                self.establish(session.clone());
                Some(session)
            }
            Err(e) => {
                tracing::info!(error = %e, "Persisted credential rejected, clearing");
                self.api.set_token(None);
                self.clear_storage();
                None
            }
        }
    }

    /// Authenticate as `role`
    ///
    /// State is untouched on failure.
    pub async fn login(&self, role: Role, credentials: &Credentials) -> ClientResult<Session> {
        let email = credentials.email.trim();
        if email.is_empty() || credentials.password.is_empty() {
            return Err(ClientError::validation(
                ErrorCode::RequiredField,
                "Email and password are required",
            ));
        }

        let request = LoginRequest {
            email: email.to_string(),
            password: credentials.password.clone(),
            role,
        };
        let response = self.api.login(&request).await?;
        if response.token.trim().is_empty() {
            return Err(ClientError::InvalidResponse("login returned an empty token".into()));
        }
        let user = UserInfo::try_from(response.user)?;
        if user.role != role {
            return Err(ClientError::RoleMismatch {
                expected: role,
                actual: user.role,
            });
        }

        self.persist(&response.token, role)?;

        let session = Session {
            token: response.token,
            role,
            user,
        };
        self.end_session(EndReason::Replaced, None);
        self.api.set_token(Some(session.token.clone()));
        self.establish(session.clone());
        tracing::info!(user_id = %session.user.id, role = %role, "Logged in");
        Ok(session)
    }

    /// Write token and role together; a failed role write puts the
    /// previous token back
    fn persist(&self, token: &str, role: Role) -> ClientResult<()> {
        let previous = self.storage.get(TOKEN_KEY)?;
        self.storage.set(TOKEN_KEY, token)?;
        if let Err(e) = self.storage.set(ROLE_KEY, role.as_str()) {
            let rollback = match previous.as_deref() {
                Some(previous) => self.storage.set(TOKEN_KEY, previous),
                None => self.storage.remove(TOKEN_KEY),
            };
            if let Err(rollback) = rollback {
                tracing::warn!(error = %rollback, "Could not roll back persisted token");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Clear the session unconditionally
    pub async fn logout(&self) {
        let ended = self.end_session(EndReason::Logout, None);
        self.clear_storage();
        if let Some(session) = ended {
            if let Err(e) = self.api.logout().await {
                tracing::debug!(error = %e, "Remote logout failed");
            }
            tracing::info!(user_id = %session.user.id, "Logged out");
        }
        if self.current().is_none() {
            self.api.set_token(None);
        }
    }

    /// React to an authentication rejection observed by a request issued
    /// under `epoch`
    ///
    /// Emits `LoginRequired` only for the live session, so concurrent
    /// rejections produce a single redirect. Returns whether it did.
    pub fn handle_unauthorized(&self, epoch: u64) -> bool {
        let Some(session) = self.end_session(EndReason::Expired, Some(epoch)) else {
            return false;
        };
        let role = session.role;
        self.api.set_token(None);
        self.clear_storage();
        tracing::warn!(user_id = %session.user.id, "Session rejected by authority");
        let _ = self.events.send(SessionEvent::LoginRequired {
            role,
            route: role.login_route(),
        });
        true
    }

    /// Route an error through [`Self::handle_unauthorized`] and hand it back
    pub fn check<T>(&self, epoch: u64, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(e) = &result
            && e.is_unauthorized()
        {
            self.handle_unauthorized(epoch);
        }
        result
    }

    fn establish(&self, session: Session) {
        let (epoch, user_id, role) = {
            let mut state = self.write();
            state.epoch += 1;
            state.cancel = CancellationToken::new();
            let ids = (state.epoch, session.user.id.clone(), session.role);
            state.session = Some(session);
            ids
        };
        let _ = self
            .events
            .send(SessionEvent::Established { user_id, role, epoch });
    }

    /// Drop the live session, cancel its loops and advance the epoch
    ///
    /// With `expected`, only the session of that epoch is ended.
    fn end_session(&self, reason: EndReason, expected: Option<u64>) -> Option<Session> {
        let (session, epoch) = {
            let mut state = self.write();
            if expected.is_some_and(|e| e != state.epoch) {
                return None;
            }
            let session = state.session.take()?;
            state.cancel.cancel();
            state.epoch += 1;
            (session, state.epoch)
        };
        let _ = self.events.send(SessionEvent::Ended { reason, epoch });
        Some(session)
    }

    fn clear_storage(&self) {
        for key in [TOKEN_KEY, ROLE_KEY] {
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!(key, error = %e, "Failed to clear persisted session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAuthority;
    use crate::session::MemorySessionStorage;

    fn store(authority: &Arc<MockAuthority>) -> (SessionStore, Arc<MemorySessionStorage>) {
        let storage = Arc::new(MemorySessionStorage::new());
        let store = SessionStore::new(Arc::new(authority.client()), storage.clone());
        (store, storage)
    }

    #[tokio::test]
    async fn test_login_persists_and_establishes() {
        let authority = MockAuthority::new();
        let driver_id = authority.add_driver("budi@pedicab.id", "secret", "Budi");
        let (store, storage) = store(&authority);
        let mut events = store.subscribe();

        let session = store
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .unwrap();

        assert_eq!(session.role, Role::Driver);
        assert_eq!(session.user.driver_key(), driver_id);
        assert_eq!(session.display_name(), "Budi");
        assert!(storage.get(TOKEN_KEY).unwrap().is_some());
        assert_eq!(storage.get(ROLE_KEY).unwrap().as_deref(), Some("driver"));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Established { role: Role::Driver, .. }
        ));
    }

    #[tokio::test]
    async fn test_login_failures_leave_state_untouched() {
        let authority = MockAuthority::new();
        authority.add_driver("budi@pedicab.id", "secret", "Budi");
        authority.add_admin("admin@pedicab.id", "root");
        let (store, storage) = store(&authority);

        let err = store
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidCredentials));

        let err = store
            .login(Role::Driver, &Credentials::new("admin@pedicab.id", "root"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RoleMismatch { .. }));

        let err = store
            .login(Role::Driver, &Credentials::new("", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation { .. }));

        authority.set_offline(true);
        let err = store
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));

        assert!(store.current().is_none());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    }

    /// Storage whose role writes fail
    #[derive(Default)]
    struct RoleWriteFails(MemorySessionStorage);

    impl SessionStorage for RoleWriteFails {
        fn get(&self, key: &str) -> ClientResult<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> ClientResult<()> {
            if key == ROLE_KEY {
                return Err(ClientError::Storage("disk full".into()));
            }
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> ClientResult<()> {
            self.0.remove(key)
        }
    }

    #[tokio::test]
    async fn test_failed_role_write_persists_nothing() {
        let authority = MockAuthority::new();
        authority.add_driver("budi@pedicab.id", "secret", "Budi");
        let storage = Arc::new(RoleWriteFails::default());
        let store = SessionStore::new(Arc::new(authority.client()), storage.clone());

        let err = store
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Storage(_)));
        assert!(store.current().is_none());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);

        storage.0.set(TOKEN_KEY, "token-old").unwrap();
        assert!(store
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .is_err());
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("token-old"));
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let authority = MockAuthority::new();
        authority.add_driver("budi@pedicab.id", "secret", "Budi");
        let (first, storage) = store(&authority);
        first
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .unwrap();

        // simulated reload: fresh store over the same storage
        let reloaded = SessionStore::new(Arc::new(authority.client()), storage.clone());
        let a = reloaded.restore().await.unwrap();
        let b = reloaded.restore().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, first.current().unwrap());
    }

    #[tokio::test]
    async fn test_restore_with_invalid_token_clears_storage() {
        let authority = MockAuthority::new();
        let (store, storage) = store(&authority);
        storage.set(TOKEN_KEY, "forged").unwrap();
        storage.set(ROLE_KEY, "driver").unwrap();

        assert!(store.restore().await.is_none());
        assert!(store.restore().await.is_none());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(ROLE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unauthorized_redirects_once() {
        let authority = MockAuthority::new();
        authority.add_driver("budi@pedicab.id", "secret", "Budi");
        let (store, storage) = store(&authority);
        store
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .unwrap();
        let epoch = store.epoch();
        let cancel = store.scope().unwrap().cancel;
        let mut events = store.subscribe();

        assert!(store.handle_unauthorized(epoch));
        assert!(!store.handle_unauthorized(epoch));
        assert!(cancel.is_cancelled());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Ended { reason: EndReason::Expired, .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LoginRequired {
                role: Role::Driver,
                route: "/driver/login"
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unauthorized_without_session_is_silent() {
        let authority = MockAuthority::new();
        let (store, _) = store(&authority);
        let mut events = store.subscribe();
        assert!(!store.handle_unauthorized(store.epoch()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_logout_is_unconditional() {
        let authority = MockAuthority::new();
        authority.add_driver("budi@pedicab.id", "secret", "Budi");
        let (store, storage) = store(&authority);
        store
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .unwrap();

        authority.set_offline(true);
        store.logout().await;
        assert!(store.current().is_none());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);

        // logging out twice is harmless
        store.logout().await;
    }
}
