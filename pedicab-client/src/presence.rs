//! Driver presence: online toggle, status heartbeat and location push

use crate::http::DispatchApi;
use crate::session::{SessionScope, SessionStore};
use crate::tasks::SessionTasks;
use crate::{ClientError, ClientResult};
use async_trait::async_trait;
use chrono::Utc;
use shared::ErrorCode;
use shared::models::{DriverPresence, GeoPoint, LocationUpdate};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};
use std::time::Duration;

/// Source of device fixes
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> ClientResult<GeoPoint>;
}

/// Reports whatever position was last set, stamped with the current time
#[derive(Debug, Default)]
pub struct FixedLocationProvider {
    position: Mutex<Option<(f64, f64)>>,
}

impl FixedLocationProvider {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            position: Mutex::new(Some((lat, lng))),
        }
    }

    /// `None` simulates a device without a fix
    pub fn set(&self, position: Option<(f64, f64)>) {
        if let Ok(mut slot) = self.position.lock() {
            *slot = position;
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn current_location(&self) -> ClientResult<GeoPoint> {
        let position = self.position.lock().ok().and_then(|p| *p);
        match position {
            Some((lat, lng)) => Ok(GeoPoint::new(lat, lng, Utc::now())),
            None => Err(ClientError::Api {
                code: ErrorCode::LocationUnavailable,
                message: ErrorCode::LocationUnavailable.message().to_string(),
            }),
        }
    }
}

/// Read-only view of presence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSnapshot {
    pub presence: DriverPresence,
    /// False until the authority has answered at least once
    pub status_known: bool,
    /// Target of the toggle in flight
    pub toggling: Option<bool>,
}

#[derive(Default)]
struct PresenceState {
    epoch: u64,
    snapshot: PresenceSnapshot,
    // sequence of the latest toggle issued; older answers are ignored
    toggle_seq: u64,
}

pub struct PresenceManager {
    api: Arc<dyn DispatchApi>,
    session: Arc<SessionStore>,
    location: Arc<dyn LocationProvider>,
    state: RwLock<PresenceState>,
}

impl PresenceManager {
    pub fn new(
        api: Arc<dyn DispatchApi>,
        session: Arc<SessionStore>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            api,
            session,
            location,
            state: RwLock::new(PresenceState::default()),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, PresenceState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the state for a merge, or `None` if `epoch` is no longer live
    fn merge_guard(&self, epoch: u64) -> Option<RwLockWriteGuard<'_, PresenceState>> {
        let mut state = self.write();
        if !self.session.is_current(epoch) {
            return None;
        }
        if state.epoch != epoch {
            *state = PresenceState {
                epoch,
                ..Default::default()
            };
        }
        Some(state)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.epoch == self.session.epoch() {
            state.snapshot.clone()
        } else {
            PresenceSnapshot::default()
        }
    }

    pub fn is_online(&self) -> bool {
        self.snapshot().presence.is_online
    }

    /// Fetch the online flag; `None` means unknown
    pub async fn get_status(&self) -> Option<bool> {
        let scope = self.session.driver_scope().ok()?;
        self.fetch_status(&scope).await
    }

    async fn fetch_status(&self, scope: &SessionScope) -> Option<bool> {
        let seq = self.write().toggle_seq;
        let result = self.api.online_status().await;
        let result = self.session.check(scope.epoch, result);

        let is_online = match result.and_then(|r| Ok(r.decode()?)) {
            Ok(is_online) => is_online,
            Err(e) => {
                tracing::warn!(driver_id = %scope.driver_key(), error = %e, "Online status unavailable");
                return None;
            }
        };

        let mut state = self.merge_guard(scope.epoch)?;
        // a toggle issued meanwhile owns the flag
        if state.toggle_seq != seq || state.snapshot.toggling.is_some() {
            return Some(is_online);
        }
        if state.snapshot.status_known && state.snapshot.presence.is_online != is_online {
            tracing::info!(driver_id = %scope.driver_key(), is_online, "Online status changed by authority");
        }
        state.snapshot.presence.is_online = is_online;
        state.snapshot.status_known = true;
        Some(is_online)
    }

    /// Ask the authority to change the online flag
    ///
    /// Only the answer to the most recent toggle is applied. On failure the
    /// previous flag stays and the error is returned for retry.
    pub async fn toggle(&self, online: bool) -> ClientResult<bool> {
        let scope = self.session.driver_scope()?;
        let seq = {
            let mut state = self
                .merge_guard(scope.epoch)
                .ok_or(ClientError::NoSession)?;
            state.toggle_seq += 1;
            state.snapshot.toggling = Some(online);
            state.toggle_seq
        };

        let result = self.api.set_online_status(online).await;
        let result = self.session.check(scope.epoch, result);

        let Some(mut state) = self.merge_guard(scope.epoch) else {
            return Err(ClientError::NoSession);
        };
        if state.toggle_seq != seq {
            tracing::debug!(seq, latest = state.toggle_seq, "Superseded toggle answer ignored");
            return result.map(|_| online);
        }
        state.snapshot.toggling = None;
        match result {
            Ok(record) => {
                let is_online = record.decode().unwrap_or(online);
                state.snapshot.presence.is_online = is_online;
                state.snapshot.status_known = true;
                tracing::info!(driver_id = %scope.driver_key(), is_online, "Online status set");
                Ok(is_online)
            }
            Err(e) => {
                tracing::warn!(driver_id = %scope.driver_key(), online, error = %e, "Toggle failed");
                Err(e)
            }
        }
    }

    /// Push one location fix; no-op while offline
    pub async fn push_location(&self, scope: &SessionScope) {
        if !self.session.is_current(scope.epoch) || !self.is_online() {
            return;
        }
        let point = match self.location.current_location().await {
            Ok(point) if point.is_valid() => point,
            Ok(point) => {
                tracing::debug!(lat = point.lat, lng = point.lng, "Discarding invalid fix");
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "No location fix");
                return;
            }
        };

        let result = self.api.push_location(&LocationUpdate::from(point)).await;
        match self.session.check(scope.epoch, result) {
            Ok(()) => {
                if let Some(mut state) = self.merge_guard(scope.epoch) {
                    state.snapshot.presence.last_known_location = Some(point);
                }
            }
            Err(e) => {
                tracing::warn!(driver_id = %scope.driver_key(), error = %e, "Location push failed");
            }
        }
    }

    /// Register the heartbeat and location loops for `scope`
    pub fn start(self: &Arc<Self>, tasks: &mut SessionTasks, scope: &SessionScope, interval: Duration) {
        let presence = Arc::clone(self);
        let heartbeat_scope = scope.clone();
        tasks.spawn_periodic("presence_heartbeat", interval, move || {
            let presence = Arc::clone(&presence);
            let scope = heartbeat_scope.clone();
            async move {
                presence.fetch_status(&scope).await;
            }
        });

        let presence = Arc::clone(self);
        let location_scope = scope.clone();
        tasks.spawn_periodic("location_push", interval, move || {
            let presence = Arc::clone(&presence);
            let scope = location_scope.clone();
            async move {
                presence.push_location(&scope).await;
            }
        });
    }
}
