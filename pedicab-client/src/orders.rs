//! Order synchronisation
//!
//! The authority's order list is the single source of truth. Every
//! successful [`OrderSyncEngine::refresh`] replaces the local partition;
//! provisional edits made by the acceptance flow only last until then.

use crate::http::DispatchApi;
use crate::session::{SessionScope, SessionStore};
use crate::{ClientError, ClientResult};
use chrono::{DateTime, Utc};
use shared::models::{Order, OrderRecord, OrderStatus};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// The driver's orders split by what the driver can do with them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPartition {
    /// Pending and unassigned, newest first
    pub available: Vec<Order>,
    /// Accepted or ongoing and held by this driver
    pub active: Vec<Order>,
    /// Completed by this driver, most recent first
    pub history: Vec<Order>,
}

impl OrderPartition {
    /// Split `orders` for `driver_id`
    ///
    /// Cancelled orders and orders held by someone else are dropped.
    pub fn from_orders(orders: impl IntoIterator<Item = Order>, driver_id: &str) -> Self {
        let mut partition = Self::default();
        for order in orders {
            match order.status {
                OrderStatus::Pending if order.is_open() => partition.available.push(order),
                OrderStatus::Accepted | OrderStatus::Ongoing if order.is_held_by(driver_id) => {
                    partition.active.push(order)
                }
                OrderStatus::Completed if order.is_held_by(driver_id) => {
                    partition.history.push(order)
                }
                _ => {}
            }
        }
        partition
            .available
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        partition
            .active
            .sort_by(|a, b| b.accepted_at.cmp(&a.accepted_at));
        partition
            .history
            .sort_by(|a, b| b.settled_at().cmp(&a.settled_at()));
        partition
    }

    pub fn find(&self, order_id: &str) -> Option<&Order> {
        self.iter().find(|o| o.id == order_id)
    }

    pub fn is_available(&self, order_id: &str) -> bool {
        self.available.iter().any(|o| o.id == order_id)
    }

    pub fn is_active(&self, order_id: &str) -> bool {
        self.active.iter().any(|o| o.id == order_id)
    }

    pub fn is_completed(&self, order_id: &str) -> bool {
        self.history.iter().any(|o| o.id == order_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.available
            .iter()
            .chain(self.active.iter())
            .chain(self.history.iter())
    }

    pub fn len(&self) -> usize {
        self.available.len() + self.active.len() + self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which lookup produced the order list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSource {
    /// `GET driver/orders`
    Primary,
    /// `GET driver/{id}/orders`
    ById,
}

/// Outcome of a successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub source: OrderSource,
    /// Records received
    pub received: usize,
    /// Records skipped because they failed to decode
    pub rejected: usize,
}

/// Read-only view of the order state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSnapshot {
    pub partition: OrderPartition,
    pub last_refreshed: Option<DateTime<Utc>>,
    /// Non-fatal error shown above the last good partition
    pub banner: Option<String>,
    pub refreshing: bool,
}

#[derive(Default)]
struct OrderState {
    epoch: u64,
    snapshot: OrderSnapshot,
    issued: u64,
    applied: u64,
    in_flight: usize,
}

pub struct OrderSyncEngine {
    api: Arc<dyn DispatchApi>,
    session: Arc<SessionStore>,
    state: RwLock<OrderState>,
}

impl OrderSyncEngine {
    pub fn new(api: Arc<dyn DispatchApi>, session: Arc<SessionStore>) -> Self {
        Self {
            api,
            session,
            state: RwLock::new(OrderState::default()),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, OrderState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn merge_guard(&self, epoch: u64) -> Option<RwLockWriteGuard<'_, OrderState>> {
        let mut state = self.write();
        if !self.session.is_current(epoch) {
            return None;
        }
        if state.epoch != epoch {
            *state = OrderState {
                epoch,
                ..Default::default()
            };
        }
        Some(state)
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.epoch == self.session.epoch() {
            state.snapshot.clone()
        } else {
            OrderSnapshot::default()
        }
    }

    pub fn partition(&self) -> OrderPartition {
        self.snapshot().partition
    }

    /// Fetch the driver's orders and replace the local partition
    ///
    /// When both lookups fail the last good partition stays and a banner is
    /// set; the error is still returned.
    pub async fn refresh(&self) -> ClientResult<RefreshReport> {
        let scope = self.session.driver_scope()?;
        let seq = {
            let mut state = self.merge_guard(scope.epoch).ok_or(ClientError::NoSession)?;
            state.issued += 1;
            state.in_flight += 1;
            state.snapshot.refreshing = true;
            state.issued
        };

        let fetched = self.fetch(&scope).await;

        let Some(mut state) = self.merge_guard(scope.epoch) else {
            tracing::debug!("Discarding order refresh for ended session");
            return Err(match fetched {
                Err(e) if e.is_unauthorized() => e,
                _ => ClientError::NoSession,
            });
        };
        state.in_flight = state.in_flight.saturating_sub(1);
        state.snapshot.refreshing = state.in_flight > 0;

        // a newer refresh already landed
        if seq < state.applied {
            tracing::debug!(seq, applied = state.applied, "Discarding out-of-date order refresh");
            let (source, records) = fetched?;
            return Ok(RefreshReport {
                source,
                received: records.len(),
                rejected: 0,
            });
        }

        let (source, records) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                if !e.is_unauthorized() {
                    state.snapshot.banner = Some(format!("Could not refresh orders: {}", e.user_message()));
                }
                return Err(e);
            }
        };

        let received = records.len();
        let mut rejected = 0;
        let mut orders = Vec::with_capacity(received);
        for record in records {
            match Order::try_from(record) {
                Ok(order) => orders.push(order),
                Err(e) => {
                    rejected += 1;
                    tracing::warn!(error = %e, "Skipping undecodable order");
                }
            }
        }

        warn_on_regressions(&state.snapshot.partition, &orders);

        state.snapshot.partition = OrderPartition::from_orders(orders, scope.driver_key());
        state.snapshot.banner = None;
        state.snapshot.last_refreshed = Some(Utc::now());
        state.applied = seq;

        tracing::debug!(
            driver_id = %scope.driver_key(),
            available = state.snapshot.partition.available.len(),
            active = state.snapshot.partition.active.len(),
            history = state.snapshot.partition.history.len(),
            rejected,
            "Orders refreshed"
        );
        Ok(RefreshReport {
            source,
            received,
            rejected,
        })
    }

    /// Primary lookup, then the by-id lookup
    async fn fetch(&self, scope: &SessionScope) -> ClientResult<(OrderSource, Vec<OrderRecord>)> {
        let primary = self.api.driver_orders().await;
        let primary_err = match self.session.check(scope.epoch, primary) {
            Ok(records) => return Ok((OrderSource::Primary, records)),
            Err(e) if e.is_unauthorized() => return Err(e),
            Err(e) => e,
        };

        tracing::warn!(
            driver_id = %scope.driver_key(),
            error = %primary_err,
            "Primary order lookup failed, trying lookup by id"
        );
        let by_id = self.api.driver_orders_by_id(scope.driver_key()).await;
        match self.session.check(scope.epoch, by_id) {
            Ok(records) => Ok((OrderSource::ById, records)),
            Err(e) => {
                tracing::warn!(driver_id = %scope.driver_key(), error = %e, "Order lookup by id failed");
                Err(e)
            }
        }
    }

    /// Apply a provisional status change until the next refresh
    pub(crate) fn provisional(&self, epoch: u64, order_id: &str, status: OrderStatus) -> bool {
        let Some(mut state) = self.merge_guard(epoch) else {
            return false;
        };
        let Some(driver_id) = self.session.scope().map(|s| s.driver_key().to_string()) else {
            return false;
        };
        let Some(mut order) = state.snapshot.partition.find(order_id).cloned() else {
            return false;
        };
        let now = Utc::now();
        order.status = status;
        match status {
            OrderStatus::Accepted => {
                order.driver_id = Some(driver_id.clone());
                order.accepted_at = Some(now);
            }
            OrderStatus::Completed => order.completed_at = Some(now),
            _ => {}
        }
        let others = state
            .snapshot
            .partition
            .iter()
            .filter(|o| o.id != order_id)
            .cloned()
            .collect::<Vec<_>>();
        state.snapshot.partition =
            OrderPartition::from_orders(others.into_iter().chain([order]), &driver_id);
        true
    }

    /// Drop an order the authority no longer knows
    pub(crate) fn forget(&self, epoch: u64, order_id: &str) {
        if let Some(mut state) = self.merge_guard(epoch) {
            let partition = &mut state.snapshot.partition;
            partition.available.retain(|o| o.id != order_id);
            partition.active.retain(|o| o.id != order_id);
            partition.history.retain(|o| o.id != order_id);
        }
    }
}

/// Log orders whose authoritative status moved backwards
fn warn_on_regressions(previous: &OrderPartition, incoming: &[Order]) {
    let known: HashMap<&str, OrderStatus> =
        previous.iter().map(|o| (o.id.as_str(), o.status)).collect();
    for order in incoming {
        if let Some(before) = known.get(order.id.as_str())
            && !before.can_transition_to(order.status)
        {
            tracing::warn!(
                order_id = %order.id,
                from = %before,
                to = %order.status,
                "Authority reported a non-monotonic status change"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAuthority;
    use crate::session::{Credentials, MemorySessionStorage, SessionEvent};
    use rust_decimal::Decimal;
    use serde_json::json;
    use shared::models::Role;
    use std::time::Duration;

    async fn engine() -> (Arc<MockAuthority>, Arc<SessionStore>, OrderSyncEngine, String) {
        let authority = MockAuthority::new();
        let driver_id = authority.add_driver("budi@pedicab.id", "secret", "Budi");
        let api: Arc<dyn DispatchApi> = Arc::new(authority.client());
        let session = Arc::new(SessionStore::new(
            api.clone(),
            Arc::new(MemorySessionStorage::new()),
        ));
        session
            .login(Role::Driver, &Credentials::new("budi@pedicab.id", "secret"))
            .await
            .unwrap();
        let engine = OrderSyncEngine::new(api, session.clone());
        (authority, session, engine, driver_id)
    }

    fn order(id: &str, status: OrderStatus, driver_id: Option<&str>) -> Order {
        Order {
            id: id.into(),
            status,
            driver_id: driver_id.map(String::from),
            customer_name: "Sari".into(),
            customer_phone: None,
            pickup_location: "Tugu".into(),
            drop_location: "Kraton".into(),
            distance_km: None,
            price: Decimal::from(15_000),
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_partition_rules() {
        let partition = OrderPartition::from_orders(
            vec![
                order("1", OrderStatus::Pending, None),
                order("2", OrderStatus::Accepted, Some("7")),
                order("3", OrderStatus::Ongoing, Some("8")),
                order("4", OrderStatus::Completed, Some("7")),
                order("5", OrderStatus::Cancelled, Some("7")),
                order("6", OrderStatus::Accepted, None),
            ],
            "7",
        );
        let ids = |orders: &[Order]| orders.iter().map(|o| o.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&partition.available), vec!["1"]);
        // a driver-scoped answer without driver_id counts as ours
        assert_eq!(ids(&partition.active), vec!["2", "6"]);
        assert!(!partition.is_active("3"));
        assert_eq!(ids(&partition.history), vec!["4"]);
        assert!(partition.find("5").is_none());
    }

    #[tokio::test]
    async fn test_refresh_partitions_and_skips_bad_records() {
        let (authority, _session, engine, driver_id) = engine().await;
        authority.add_order("O1", Decimal::from(15_000));
        authority.add_completed_order("O2", &driver_id, Decimal::from(18_000), Utc::now());
        authority.add_raw_order(serde_json::from_value::<OrderRecord>(json!({"id": 99, "status": "pending"})).unwrap());

        let report = engine.refresh().await.unwrap();
        assert_eq!(report.source, OrderSource::Primary);
        assert_eq!(report.received, 3);
        assert_eq!(report.rejected, 1);

        let snapshot = engine.snapshot();
        assert!(snapshot.partition.is_available("O1"));
        assert!(snapshot.partition.is_completed("O2"));
        assert!(snapshot.last_refreshed.is_some());
        assert!(!snapshot.refreshing);
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_lookup_by_id() {
        let (authority, _session, engine, _) = engine().await;
        authority.add_order("O1", Decimal::from(15_000));
        authority.set_primary_orders_down(true);

        let report = engine.refresh().await.unwrap();
        assert_eq!(report.source, OrderSource::ById);
        assert!(engine.partition().is_available("O1"));
        assert_eq!(authority.calls("driver/{id}/orders"), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_partition() {
        let (authority, _session, engine, _) = engine().await;
        authority.add_order("O1", Decimal::from(15_000));
        engine.refresh().await.unwrap();

        authority.set_order_lookups_down(true);
        assert!(engine.refresh().await.is_err());
        let snapshot = engine.snapshot();
        assert!(snapshot.partition.is_available("O1"));
        assert!(snapshot.banner.is_some());

        authority.set_order_lookups_down(false);
        engine.refresh().await.unwrap();
        assert!(engine.snapshot().banner.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_redirects_once() {
        let (authority, session, engine, _) = engine().await;
        let mut events = session.subscribe();
        authority.expire_tokens();

        let err = engine.refresh().await.unwrap_err();
        assert!(err.is_unauthorized());
        // by-id fallback must not run after an auth rejection
        assert_eq!(authority.calls("driver/{id}/orders"), 0);
        assert!(session.current().is_none());

        assert!(matches!(engine.refresh().await, Err(ClientError::NoSession)));

        let mut redirects = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::LoginRequired { .. }) {
                redirects += 1;
            }
        }
        assert_eq!(redirects, 1);
    }

    #[tokio::test]
    async fn test_result_for_ended_session_is_discarded() {
        let (authority, session, engine, _) = engine().await;
        let engine = Arc::new(engine);
        authority.add_order("O1", Decimal::from(15_000));
        authority.set_latency("driver/orders", Duration::from_millis(50));

        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.logout().await;

        assert!(matches!(pending.await.unwrap(), Err(ClientError::NoSession)));
        assert!(engine.snapshot().partition.is_empty());
    }

    #[tokio::test]
    async fn test_late_failure_does_not_banner_newer_list() {
        let (authority, _session, engine, _) = engine().await;
        let engine = Arc::new(engine);
        authority.add_order("O1", Decimal::from(15_000));
        authority.set_order_lookups_down(true);
        authority.set_latency("driver/{id}/orders", Duration::from_millis(60));

        let slow = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(15)).await;
        authority.set_order_lookups_down(false);
        engine.refresh().await.unwrap();

        assert!(slow.await.unwrap().is_err());
        let snapshot = engine.snapshot();
        assert!(snapshot.banner.is_none());
        assert!(snapshot.partition.is_available("O1"));
        assert!(!snapshot.refreshing);
    }
}
