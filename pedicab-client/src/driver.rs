// pedicab-client/src/driver.rs
// 司机端门面 - 组装各引擎并管理会话后台任务

use crate::acceptance::{AcceptOutcome, AcceptTicket, AcceptanceCoordinator, ClaimState};
use crate::earnings::EarningsAggregator;
use crate::http::DispatchApi;
use crate::orders::{OrderPartition, OrderSyncEngine, RefreshReport};
use crate::presence::{LocationProvider, PresenceManager, PresenceSnapshot};
use crate::session::{
    Credentials, FileSessionStorage, Session, SessionEvent, SessionStorage, SessionStore,
};
use crate::tasks::SessionTasks;
use crate::withdrawals::{WithdrawalRequest, WithdrawalService};
use crate::{ClientConfig, ClientResult};
use shared::models::{EarningsSnapshot, Role, Withdrawal};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

/// Everything a driver screen renders
#[derive(Debug, Clone, Default)]
pub struct DriverSnapshot {
    pub session: Option<Session>,
    pub partition: OrderPartition,
    pub claims: HashMap<String, ClaimState>,
    pub presence: PresenceSnapshot,
    pub earnings: EarningsSnapshot,
    pub withdrawals: Vec<Withdrawal>,
    /// Non-fatal order sync problem
    pub banner: Option<String>,
    pub refreshing: bool,
}

/// Driver-side client
///
/// Owns one engine per concern and the background loops of the live
/// session. Loops start on login or restore and stop when the session
/// ends for any reason.
pub struct DriverClient {
    config: ClientConfig,
    session: Arc<SessionStore>,
    presence: Arc<PresenceManager>,
    orders: Arc<OrderSyncEngine>,
    acceptance: Arc<AcceptanceCoordinator>,
    earnings: Arc<EarningsAggregator>,
    withdrawals: WithdrawalService,
    tasks: Mutex<Option<SessionTasks>>,
}

impl DriverClient {
    pub fn new(
        config: ClientConfig,
        api: Arc<dyn DispatchApi>,
        storage: Arc<dyn SessionStorage>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(api.clone(), storage));
        let presence = Arc::new(PresenceManager::new(
            api.clone(),
            session.clone(),
            location,
        ));
        let orders = Arc::new(OrderSyncEngine::new(api.clone(), session.clone()));
        let earnings = Arc::new(EarningsAggregator::new(
            api.clone(),
            session.clone(),
            orders.clone(),
            config.utc_offset,
        ));
        let acceptance = Arc::new(AcceptanceCoordinator::new(
            api.clone(),
            session.clone(),
            orders.clone(),
            earnings.clone(),
        ));
        let withdrawals =
            WithdrawalService::new(api, session.clone(), earnings.clone(), config.min_withdrawal);

        Self {
            config,
            session,
            presence,
            orders,
            acceptance,
            earnings,
            withdrawals,
            tasks: Mutex::new(None),
        }
    }

    /// Client talking to the network backend with a file-backed session
    pub fn connect(config: ClientConfig, location: Arc<dyn LocationProvider>) -> ClientResult<Self> {
        let api: Arc<dyn DispatchApi> = Arc::new(config.build_http_client()?);
        let storage: Arc<dyn SessionStorage> =
            Arc::new(FileSessionStorage::in_dir(&config.session_dir));
        tracing::info!(base_url = %config.base_url, "Driver client created");
        Ok(Self::new(config, api, storage, location))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn orders(&self) -> &Arc<OrderSyncEngine> {
        &self.orders
    }

    pub fn presence(&self) -> &Arc<PresenceManager> {
        &self.presence
    }

    pub fn earnings(&self) -> &Arc<EarningsAggregator> {
        &self.earnings
    }

    pub fn acceptance(&self) -> &Arc<AcceptanceCoordinator> {
        &self.acceptance
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    // ========== Session ==========

    /// Resume a persisted session; loops start only for drivers
    pub async fn restore(&self) -> Option<Session> {
        let session = self.session.restore().await?;
        if session.role == Role::Driver {
            self.start_session().await;
        }
        Some(session)
    }

    pub async fn login(&self, credentials: &Credentials) -> ClientResult<Session> {
        let session = self.session.login(Role::Driver, credentials).await?;
        self.start_session().await;
        Ok(session)
    }

    pub async fn logout(&self) {
        self.stop_tasks().await;
        self.session.logout().await;
    }

    /// Names of the background loops currently running
    pub async fn running_tasks(&self) -> Vec<&'static str> {
        self.tasks
            .lock()
            .await
            .as_ref()
            .map(SessionTasks::running)
            .unwrap_or_default()
    }

    async fn stop_tasks(&self) {
        if let Some(tasks) = self.tasks.lock().await.take() {
            tasks.shutdown().await;
        }
    }

    /// Spawn the session loops and load the first data
    async fn start_session(&self) {
        let Ok(scope) = self.session.driver_scope() else {
            return;
        };
        {
            let mut slot = self.tasks.lock().await;
            // loops of a live session are children of its token
            let live = slot
                .as_ref()
                .is_some_and(|t| !t.shutdown_token().is_cancelled() && !scope.cancel.is_cancelled());
            if live {
                return;
            }
            if let Some(previous) = slot.take() {
                previous.shutdown().await;
            }
            let mut tasks = SessionTasks::new(scope.cancel.clone());
            self.presence
                .start(&mut tasks, &scope, self.config.presence_interval);
            if let Some(interval) = self.config.order_poll_interval {
                self.start_order_refresh(&mut tasks, interval);
            }
            tracing::info!(
                driver_id = %scope.driver_key(),
                tasks = ?tasks.running(),
                "Driver session loops started"
            );
            *slot = Some(tasks);
        }

        if let Err(e) = self.orders.refresh().await {
            tracing::warn!(error = %e, "Initial order load failed");
        }
        if let Err(e) = self.earnings.refresh().await {
            tracing::warn!(error = %e, "Initial earnings load failed");
        }
    }

    /// Optional auto-refresh; earnings follow every polled list
    fn start_order_refresh(&self, tasks: &mut SessionTasks, interval: Duration) {
        let orders = self.orders.clone();
        let earnings = self.earnings.clone();
        tasks.spawn_periodic("order_refresh", interval, move || {
            let orders = orders.clone();
            let earnings = earnings.clone();
            async move {
                if let Err(e) = orders.refresh().await {
                    tracing::warn!(error = %e, "Scheduled order refresh failed");
                }
                earnings.recompute();
            }
        });
    }

    // ========== Orders ==========

    pub async fn refresh_orders(&self) -> ClientResult<RefreshReport> {
        let report = self.orders.refresh().await;
        self.earnings.recompute();
        report
    }

    pub fn prepare_accept(&self, order_id: &str) -> ClientResult<AcceptTicket> {
        self.acceptance.prepare_accept(order_id)
    }

    pub async fn accept(&self, ticket: AcceptTicket) -> ClientResult<AcceptOutcome> {
        self.acceptance.accept(ticket).await
    }

    pub async fn complete(&self, order_id: &str) -> ClientResult<()> {
        self.acceptance.complete(order_id).await
    }

    pub async fn cancel(&self, order_id: &str) -> ClientResult<()> {
        self.acceptance.cancel(order_id).await
    }

    // ========== Presence ==========

    pub async fn toggle_online(&self, online: bool) -> ClientResult<bool> {
        self.presence.toggle(online).await
    }

    // ========== Earnings ==========

    pub async fn refresh_earnings(&self) -> ClientResult<EarningsSnapshot> {
        self.earnings.refresh().await
    }

    pub async fn submit_withdrawal(&self, request: &WithdrawalRequest) -> ClientResult<Withdrawal> {
        self.withdrawals.submit(request).await
    }

    pub async fn withdrawals(&self) -> ClientResult<Vec<Withdrawal>> {
        self.withdrawals.list().await
    }

    pub fn snapshot(&self) -> DriverSnapshot {
        let orders = self.orders.snapshot();
        DriverSnapshot {
            session: self.session.current(),
            claims: self.acceptance.claim_states(),
            partition: orders.partition,
            presence: self.presence.snapshot(),
            earnings: self.earnings.snapshot(),
            withdrawals: self.earnings.withdrawals(),
            banner: orders.banner,
            refreshing: orders.refreshing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAuthority;
    use crate::presence::FixedLocationProvider;
    use crate::session::MemorySessionStorage;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn client(authority: &Arc<MockAuthority>, config: ClientConfig) -> DriverClient {
        DriverClient::new(
            config,
            Arc::new(authority.client()),
            Arc::new(MemorySessionStorage::new()),
            Arc::new(FixedLocationProvider::new(-7.797, 110.370)),
        )
    }

    fn fast_config() -> ClientConfig {
        ClientConfig::default()
            .with_presence_interval(Duration::from_millis(20))
            .with_order_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_login_starts_loops_and_loads_data() {
        let authority = MockAuthority::new();
        authority.add_driver("a@pedicab.id", "secret", "Agus");
        authority.add_order("O1", Decimal::from(15_000));
        let driver = client(&authority, fast_config());

        driver
            .login(&Credentials::new("a@pedicab.id", "secret"))
            .await
            .unwrap();
        let mut running = driver.running_tasks().await;
        running.sort_unstable();
        assert_eq!(running, vec!["location_push", "order_refresh", "presence_heartbeat"]);

        let snapshot = driver.snapshot();
        assert!(snapshot.partition.is_available("O1"));
        assert_eq!(snapshot.claims.get("O1"), Some(&ClaimState::Available));

        driver.logout().await;
        assert!(driver.running_tasks().await.is_empty());
        assert!(driver.snapshot().session.is_none());
        assert!(driver.snapshot().partition.is_empty());
    }

    #[tokio::test]
    async fn test_polled_orders_update_earnings() {
        let authority = MockAuthority::new();
        let driver_id = authority.add_driver("a@pedicab.id", "secret", "Agus");
        let driver = client(&authority, fast_config());
        driver
            .login(&Credentials::new("a@pedicab.id", "secret"))
            .await
            .unwrap();
        assert!(driver.snapshot().earnings.total_earnings.is_zero());

        // finished on another device; only the poll loop sees it
        authority.add_completed_order("H1", &driver_id, Decimal::from(12_000), Utc::now());
        tokio::time::sleep(Duration::from_millis(80)).await;

        let snapshot = driver.snapshot();
        assert!(snapshot.partition.is_completed("H1"));
        assert_eq!(snapshot.earnings.total_earnings, Decimal::from(12_000));
        assert_eq!(snapshot.earnings.completed_trip_count, 1);
        driver.logout().await;
    }

    #[tokio::test]
    async fn test_manual_refresh_without_poll_interval() {
        let authority = MockAuthority::new();
        authority.add_driver("a@pedicab.id", "secret", "Agus");
        let driver = client(
            &authority,
            ClientConfig::default().with_presence_interval(Duration::from_secs(60)),
        );
        driver
            .login(&Credentials::new("a@pedicab.id", "secret"))
            .await
            .unwrap();
        assert!(!driver.running_tasks().await.contains(&"order_refresh"));
    }

    #[tokio::test]
    async fn test_expired_token_stops_loops() {
        let authority = MockAuthority::new();
        authority.add_driver("a@pedicab.id", "secret", "Agus");
        let driver = client(
            &authority,
            ClientConfig::default().with_presence_interval(Duration::from_secs(60)),
        );
        driver
            .login(&Credentials::new("a@pedicab.id", "secret"))
            .await
            .unwrap();
        assert_eq!(driver.running_tasks().await.len(), 2);

        authority.expire_tokens();
        assert!(driver.refresh_orders().await.unwrap_err().is_unauthorized());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(driver.running_tasks().await.is_empty());
        assert!(driver.session().current().is_none());
    }
}
