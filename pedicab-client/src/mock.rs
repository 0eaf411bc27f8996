//! In-memory dispatch authority
//!
//! Holds canonical orders, sessions and withdrawals the way the backend
//! does and enforces a single winner per accepted order. Each
//! [`MockAuthority::client`] is one device: it carries its own bearer
//! token, so several drivers can race against the same authority.

use crate::http::DispatchApi;
use crate::{ClientError, ClientResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use shared::ErrorCode;
use shared::client::{LoginRequest, LoginResponse};
use shared::models::{
    EarningsRecord, LocationUpdate, NewWithdrawal, OnlineStatusRecord, Order, OrderRecord,
    OrderStatus, Role, UserRecord, Withdrawal, WithdrawalRecord, WithdrawalStatus,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Account {
    email: String,
    password: String,
    user_id: String,
    driver_id: Option<String>,
    name: String,
    role: Role,
}

impl Account {
    fn record(&self) -> UserRecord {
        UserRecord {
            id: Some(Value::String(self.user_id.clone())),
            name: Some(self.name.clone()),
            email: Some(self.email.clone()),
            role: Some(self.role.as_str().to_string()),
            driver_id: self.driver_id.clone().map(Value::String),
            ..Default::default()
        }
    }

    fn driver_id(&self) -> ClientResult<&str> {
        match (&self.role, &self.driver_id) {
            (Role::Driver, Some(id)) => Ok(id),
            _ => Err(ClientError::Forbidden(
                ErrorCode::DriverRequired.message().to_string(),
            )),
        }
    }
}

#[derive(Default)]
struct AuthorityState {
    accounts: Vec<Account>,
    tokens: HashMap<String, usize>,
    next_id: u64,
    orders: BTreeMap<String, Order>,
    raw_orders: Vec<OrderRecord>,
    withdrawals: Vec<(String, Withdrawal)>,
    online: HashMap<String, bool>,
    locations: HashMap<String, Vec<LocationUpdate>>,
    server_earnings: Option<EarningsRecord>,
    offline: bool,
    primary_orders_down: bool,
    order_lookups_down: bool,
    status_delays: VecDeque<Duration>,
    latency: HashMap<&'static str, Duration>,
    calls: HashMap<&'static str, usize>,
}

impl AuthorityState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn account(&self, token: Option<&str>) -> ClientResult<Account> {
        token
            .and_then(|t| self.tokens.get(t))
            .and_then(|idx| self.accounts.get(*idx))
            .cloned()
            .ok_or(ClientError::Unauthorized)
    }

    fn visible_orders(&self, driver_id: &str) -> Vec<OrderRecord> {
        self.orders
            .values()
            .filter(|o| o.is_open() || o.driver_id.as_deref() == Some(driver_id))
            .map(OrderRecord::from)
            .chain(self.raw_orders.iter().cloned())
            .collect()
    }

    fn held_order(&mut self, order_id: &str, driver_id: &str) -> ClientResult<&mut Order> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ClientError::NotFound("Order not found".into()))?;
        if order.driver_id.as_deref() != Some(driver_id) {
            return Err(ClientError::Forbidden(
                ErrorCode::OrderNotAssigned.message().to_string(),
            ));
        }
        Ok(order)
    }
}

/// Canonical state shared by every [`MockApi`] handle
#[derive(Default)]
pub struct MockAuthority {
    state: Mutex<AuthorityState>,
}

impl MockAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A new device talking to this authority
    pub fn client(self: &Arc<Self>) -> MockApi {
        MockApi {
            authority: Arc::clone(self),
            token: RwLock::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthorityState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a driver account; returns its driver id
    pub fn add_driver(&self, email: &str, password: &str, name: &str) -> String {
        let mut state = self.lock();
        let n = state.next_id();
        let driver_id = format!("{}", 100 + n);
        state.accounts.push(Account {
            email: email.to_string(),
            password: password.to_string(),
            user_id: n.to_string(),
            driver_id: Some(driver_id.clone()),
            name: name.to_string(),
            role: Role::Driver,
        });
        driver_id
    }

    /// Register an admin account; returns its user id
    pub fn add_admin(&self, email: &str, password: &str) -> String {
        let mut state = self.lock();
        let n = state.next_id();
        state.accounts.push(Account {
            email: email.to_string(),
            password: password.to_string(),
            user_id: n.to_string(),
            driver_id: None,
            name: "Admin".to_string(),
            role: Role::Admin,
        });
        n.to_string()
    }

    pub fn insert_order(&self, order: Order) {
        self.lock().orders.insert(order.id.clone(), order);
    }

    /// A pending order nobody holds yet
    pub fn add_order(&self, id: &str, price: Decimal) {
        self.insert_order(Order {
            id: id.to_string(),
            status: OrderStatus::Pending,
            driver_id: None,
            customer_name: format!("Customer {id}"),
            customer_phone: Some("081234567890".to_string()),
            pickup_location: "Malioboro".to_string(),
            drop_location: "Kraton".to_string(),
            distance_km: Some(Decimal::new(25, 1)),
            price,
            created_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
        });
    }

    /// An order `driver_id` already finished at `completed_at`
    pub fn add_completed_order(
        &self,
        id: &str,
        driver_id: &str,
        price: Decimal,
        completed_at: DateTime<Utc>,
    ) {
        self.insert_order(Order {
            id: id.to_string(),
            status: OrderStatus::Completed,
            driver_id: Some(driver_id.to_string()),
            customer_name: format!("Customer {id}"),
            customer_phone: None,
            pickup_location: "Tugu".to_string(),
            drop_location: "Prawirotaman".to_string(),
            distance_km: None,
            price,
            created_at: completed_at,
            accepted_at: Some(completed_at),
            completed_at: Some(completed_at),
        });
    }

    /// A record served verbatim in every order listing
    pub fn add_raw_order(&self, record: OrderRecord) {
        self.lock().raw_orders.push(record);
    }

    /// Delete an order as if an admin purged it
    pub fn remove_order(&self, id: &str) {
        self.lock().orders.remove(id);
    }

    pub fn order(&self, id: &str) -> Option<Order> {
        self.lock().orders.get(id).cloned()
    }

    pub fn add_withdrawal(&self, driver_id: &str, amount: Decimal, status: WithdrawalStatus) {
        let mut state = self.lock();
        let id = format!("w{}", state.next_id());
        state.withdrawals.push((
            driver_id.to_string(),
            Withdrawal {
                id,
                amount,
                bank_name: "BCA".to_string(),
                account_number: "1234567890".to_string(),
                account_name: "Driver".to_string(),
                status,
                created_at: Utc::now(),
            },
        ));
    }

    pub fn withdrawals(&self, driver_id: &str) -> Vec<Withdrawal> {
        self.lock()
            .withdrawals
            .iter()
            .filter(|(owner, _)| owner == driver_id)
            .map(|(_, w)| w.clone())
            .collect()
    }

    /// Aggregates returned by `GET driver/earnings`; `None` returns an empty body
    pub fn set_server_earnings(&self, earnings: Option<EarningsRecord>) {
        self.lock().server_earnings = earnings;
    }

    /// Every call fails with a connectivity error
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Invalidate every issued token
    pub fn expire_tokens(&self) {
        self.lock().tokens.clear();
    }

    /// `GET driver/orders` fails as if the driver profile could not be resolved
    pub fn set_primary_orders_down(&self, down: bool) {
        self.lock().primary_orders_down = down;
    }

    /// Both order lookups fail
    pub fn set_order_lookups_down(&self, down: bool) {
        let mut state = self.lock();
        state.primary_orders_down = down;
        state.order_lookups_down = down;
    }

    /// Admin forces a driver offline out of band
    pub fn force_offline(&self, driver_id: &str) {
        self.lock().online.insert(driver_id.to_string(), false);
    }

    pub fn is_online(&self, driver_id: &str) -> bool {
        self.lock().online.get(driver_id).copied().unwrap_or(false)
    }

    /// Response delays for successive `PUT driver/online-status` calls
    ///
    /// The state change applies on arrival; only the answer is delayed.
    pub fn set_status_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.lock().status_delays = delays.into_iter().collect();
    }

    /// Delay every answer of `endpoint` (e.g. `"driver/orders"`)
    pub fn set_latency(&self, endpoint: &'static str, delay: Duration) {
        self.lock().latency.insert(endpoint, delay);
    }

    pub fn locations(&self, driver_id: &str) -> Vec<LocationUpdate> {
        self.lock()
            .locations
            .get(driver_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of calls received by `endpoint`
    pub fn calls(&self, endpoint: &str) -> usize {
        self.lock().calls.get(endpoint).copied().unwrap_or(0)
    }
}

/// One device's connection to a [`MockAuthority`]
pub struct MockApi {
    authority: Arc<MockAuthority>,
    token: RwLock<Option<String>>,
}

impl MockApi {
    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    async fn call<T, F>(&self, endpoint: &'static str, f: F) -> ClientResult<T>
    where
        T: Send,
        F: FnOnce(&mut AuthorityState, Option<&str>) -> ClientResult<T> + Send,
    {
        let token = self.token();
        let (result, delay) = {
            let mut state = self.authority.lock();
            *state.calls.entry(endpoint).or_default() += 1;
            if state.offline {
                return Err(ClientError::Network("authority unreachable".into()));
            }
            let delay = state.latency.get(endpoint).copied();
            (f(&mut *state, token.as_deref()), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[async_trait]
impl DispatchApi for MockApi {
    fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        self.call("auth/login", |state, _| {
            let idx = state
                .accounts
                .iter()
                .position(|a| a.email == request.email && a.password == request.password)
                .ok_or(ClientError::InvalidCredentials)?;
            let token = format!("token-{}", state.next_id());
            state.tokens.insert(token.clone(), idx);
            Ok(LoginResponse {
                token,
                user: state.accounts[idx].record(),
            })
        })
        .await
    }

    async fn logout(&self) -> ClientResult<()> {
        self.call("auth/logout", |state, token| {
            state.account(token)?;
            if let Some(token) = token {
                state.tokens.remove(token);
            }
            Ok(())
        })
        .await
    }

    async fn profile(&self) -> ClientResult<UserRecord> {
        self.call("profile", |state, token| Ok(state.account(token)?.record()))
            .await
    }

    async fn driver_orders(&self) -> ClientResult<Vec<OrderRecord>> {
        self.call("driver/orders", |state, token| {
            let account = state.account(token)?;
            if state.primary_orders_down {
                return Err(ClientError::NotFound(
                    ErrorCode::DriverNotFound.message().to_string(),
                ));
            }
            Ok(state.visible_orders(account.driver_id()?))
        })
        .await
    }

    async fn driver_orders_by_id(&self, driver_id: &str) -> ClientResult<Vec<OrderRecord>> {
        self.call("driver/{id}/orders", |state, token| {
            let account = state.account(token)?;
            if state.order_lookups_down {
                return Err(ClientError::Api {
                    code: ErrorCode::InternalError,
                    message: "lookup failed".into(),
                });
            }
            let own = account.driver_id()?;
            if driver_id != own && driver_id != account.user_id {
                return Err(ClientError::Forbidden("not your orders".into()));
            }
            Ok(state.visible_orders(own))
        })
        .await
    }

    async fn accept_order(&self, order_id: &str) -> ClientResult<()> {
        self.call("driver/orders/{id}/accept", |state, token| {
            let account = state.account(token)?;
            let driver_id = account.driver_id()?.to_string();
            let order = state
                .orders
                .get_mut(order_id)
                .ok_or_else(|| ClientError::NotFound("Order not found".into()))?;
            if !order.is_open() {
                return Err(ClientError::Conflict(
                    "Order already accepted by another driver".into(),
                ));
            }
            order.driver_id = Some(driver_id);
            order.status = OrderStatus::Accepted;
            order.accepted_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    async fn complete_order(&self, order_id: &str) -> ClientResult<()> {
        self.call("driver/orders/{id}/complete", |state, token| {
            let account = state.account(token)?;
            let driver_id = account.driver_id()?.to_string();
            let order = state.held_order(order_id, &driver_id)?;
            match order.status {
                OrderStatus::Completed => Ok(()),
                OrderStatus::Cancelled => Err(ClientError::Conflict(
                    ErrorCode::OrderAlreadyCancelled.message().to_string(),
                )),
                _ => {
                    order.status = OrderStatus::Completed;
                    order.completed_at = Some(Utc::now());
                    Ok(())
                }
            }
        })
        .await
    }

    async fn cancel_order(&self, order_id: &str) -> ClientResult<()> {
        self.call("driver/orders/{id}/cancel", |state, token| {
            let account = state.account(token)?;
            let driver_id = account.driver_id()?.to_string();
            let order = state.held_order(order_id, &driver_id)?;
            if order.status.is_terminal() {
                return Err(ClientError::Conflict(
                    ErrorCode::OrderInvalidState.message().to_string(),
                ));
            }
            order.status = OrderStatus::Cancelled;
            Ok(())
        })
        .await
    }

    async fn earnings(&self) -> ClientResult<EarningsRecord> {
        self.call("driver/earnings", |state, token| {
            state.account(token)?.driver_id()?;
            Ok(state.server_earnings.clone().unwrap_or_default())
        })
        .await
    }

    async fn withdrawals(&self) -> ClientResult<Vec<WithdrawalRecord>> {
        self.call("driver/withdrawals", |state, token| {
            let account = state.account(token)?;
            let driver_id = account.driver_id()?;
            Ok(state
                .withdrawals
                .iter()
                .filter(|(owner, _)| owner == driver_id)
                .map(|(_, w)| WithdrawalRecord::from(w))
                .collect())
        })
        .await
    }

    async fn create_withdrawal(&self, request: &NewWithdrawal) -> ClientResult<WithdrawalRecord> {
        self.call("POST driver/withdrawals", |state, token| {
            let account = state.account(token)?;
            let driver_id = account.driver_id()?.to_string();
            let withdrawal = Withdrawal {
                id: format!("w{}", state.next_id()),
                amount: request.amount,
                bank_name: request.bank_name.clone(),
                account_number: request.account_number.clone(),
                account_name: request.account_name.clone(),
                status: WithdrawalStatus::Pending,
                created_at: Utc::now(),
            };
            let record = WithdrawalRecord::from(&withdrawal);
            state.withdrawals.push((driver_id, withdrawal));
            Ok(record)
        })
        .await
    }

    async fn online_status(&self) -> ClientResult<OnlineStatusRecord> {
        self.call("driver/online-status", |state, token| {
            let account = state.account(token)?;
            let driver_id = account.driver_id()?;
            Ok(OnlineStatusRecord::new(
                state.online.get(driver_id).copied().unwrap_or(false),
            ))
        })
        .await
    }

    async fn set_online_status(&self, is_online: bool) -> ClientResult<OnlineStatusRecord> {
        let delay = self
            .call("PUT driver/online-status", |state, token| {
                let account = state.account(token)?;
                let driver_id = account.driver_id()?.to_string();
                state.online.insert(driver_id, is_online);
                Ok(state.status_delays.pop_front())
            })
            .await?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(OnlineStatusRecord::new(is_online))
    }

    async fn push_location(&self, update: &LocationUpdate) -> ClientResult<()> {
        self.call("driver/location", |state, token| {
            let account = state.account(token)?;
            let driver_id = account.driver_id()?.to_string();
            state.locations.entry(driver_id).or_default().push(*update);
            Ok(())
        })
        .await
    }
}
