//! Earnings aggregation
//!
//! [`summarize`] and [`reconcile`] are pure; [`EarningsAggregator`] only
//! gathers their inputs and keeps the last result.

use crate::http::DispatchApi;
use crate::orders::OrderSyncEngine;
use crate::session::SessionStore;
use crate::{ClientError, ClientResult};
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use shared::models::{
    EarningsSnapshot, Order, OrderStatus, ServerEarnings, Withdrawal, WithdrawalStatus,
};
use shared::util::{same_local_day, same_local_month};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// Earnings of `driver_id` from raw orders and withdrawals
///
/// Only completed orders held by the driver count. "Today" and "this
/// month" are taken in `now`'s offset.
pub fn summarize(
    orders: &[Order],
    withdrawals: &[Withdrawal],
    driver_id: &str,
    now: DateTime<FixedOffset>,
) -> EarningsSnapshot {
    let mut snapshot = EarningsSnapshot::default();

    for order in orders
        .iter()
        .filter(|o| o.status == OrderStatus::Completed && o.is_held_by(driver_id))
    {
        let settled = order.settled_at();
        snapshot.total_earnings += order.price;
        snapshot.completed_trip_count += 1;
        if same_local_month(settled, now) {
            snapshot.monthly_earnings += order.price;
        }
        if same_local_day(settled, now) {
            snapshot.today_earnings += order.price;
            snapshot.today_trip_count += 1;
        }
    }

    for withdrawal in withdrawals {
        match withdrawal.status {
            WithdrawalStatus::Approved | WithdrawalStatus::Completed => {
                snapshot.withdrawn_total += withdrawal.amount
            }
            WithdrawalStatus::Pending => snapshot.pending_withdrawal_total += withdrawal.amount,
            WithdrawalStatus::Rejected => {}
        }
    }

    snapshot.available_balance = balance(&snapshot);
    snapshot
}

fn balance(snapshot: &EarningsSnapshot) -> Decimal {
    (snapshot.total_earnings - snapshot.withdrawn_total - snapshot.pending_withdrawal_total)
        .max(Decimal::ZERO)
}

/// A server value wins unless it is absent, or zero while local data says
/// otherwise
fn prefer<T: Copy + PartialEq + Default>(local: T, server: Option<T>) -> T {
    match server {
        Some(value) if value != T::default() || local == T::default() => value,
        _ => local,
    }
}

/// Overlay server-provided aggregates onto a local summary
pub fn reconcile(local: EarningsSnapshot, server: Option<&ServerEarnings>) -> EarningsSnapshot {
    let Some(server) = server else {
        return local;
    };
    let mut merged = EarningsSnapshot {
        total_earnings: prefer(local.total_earnings, server.total_earnings),
        today_earnings: prefer(local.today_earnings, server.today_earnings),
        monthly_earnings: prefer(local.monthly_earnings, server.monthly_earnings),
        completed_trip_count: prefer(local.completed_trip_count, server.completed_trip_count),
        today_trip_count: prefer(local.today_trip_count, server.today_trip_count),
        ..local
    };
    merged.available_balance = balance(&merged);
    merged
}

#[derive(Default)]
struct EarningsState {
    epoch: u64,
    withdrawals: Vec<Withdrawal>,
    server: Option<ServerEarnings>,
    // completed order ids the server aggregates were fetched against
    server_basis: Vec<String>,
    snapshot: EarningsSnapshot,
    // withdrawals have been loaded at least once
    loaded: bool,
}

pub struct EarningsAggregator {
    api: Arc<dyn DispatchApi>,
    session: Arc<SessionStore>,
    orders: Arc<OrderSyncEngine>,
    offset: FixedOffset,
    state: RwLock<EarningsState>,
}

impl EarningsAggregator {
    pub fn new(
        api: Arc<dyn DispatchApi>,
        session: Arc<SessionStore>,
        orders: Arc<OrderSyncEngine>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            api,
            session,
            orders,
            offset,
            state: RwLock::new(EarningsState::default()),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, EarningsState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn merge_guard(&self, epoch: u64) -> Option<RwLockWriteGuard<'_, EarningsState>> {
        let mut state = self.write();
        if !self.session.is_current(epoch) {
            return None;
        }
        if state.epoch != epoch {
            *state = EarningsState {
                epoch,
                ..Default::default()
            };
        }
        Some(state)
    }

    pub fn snapshot(&self) -> EarningsSnapshot {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.epoch == self.session.epoch() {
            state.snapshot.clone()
        } else {
            EarningsSnapshot::default()
        }
    }

    /// Spendable balance, once withdrawals have been loaded
    pub fn available_balance(&self) -> Option<Decimal> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        (state.epoch == self.session.epoch() && state.loaded)
            .then_some(state.snapshot.available_balance)
    }

    pub fn withdrawals(&self) -> Vec<Withdrawal> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.epoch == self.session.epoch() {
            state.withdrawals.clone()
        } else {
            Vec::new()
        }
    }

    /// Recompute from the current order history and known withdrawals
    pub fn recompute(&self) -> EarningsSnapshot {
        let Some(scope) = self.session.scope() else {
            return EarningsSnapshot::default();
        };
        let history = self.orders.partition().history;
        let now = Utc::now().with_timezone(&self.offset);
        let Some(mut state) = self.merge_guard(scope.epoch) else {
            return EarningsSnapshot::default();
        };
        if state.server.is_some() && history_ids(&history) != state.server_basis {
            tracing::debug!(
                driver_id = %scope.driver_key(),
                "Order history changed since aggregates were fetched, using local summary"
            );
            state.server = None;
        }
        let local = summarize(&history, &state.withdrawals, scope.driver_key(), now);
        state.snapshot = reconcile(local, state.server.as_ref());
        state.snapshot.clone()
    }

    /// Fetch withdrawals and server aggregates, then recompute
    ///
    /// Missing or failing aggregates fall back to the local summary, and so
    /// do aggregates older than the current order history.
    pub async fn refresh(&self) -> ClientResult<EarningsSnapshot> {
        let scope = self.session.driver_scope()?;
        let basis = history_ids(&self.orders.partition().history);
        let (withdrawals, server) = tokio::join!(self.api.withdrawals(), self.api.earnings());

        let withdrawals = self.session.check(scope.epoch, withdrawals)?;
        let server = match self.session.check(scope.epoch, server) {
            Ok(record) => match ServerEarnings::try_from(record) {
                Ok(server) => Some(server),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring undecodable earnings aggregates");
                    None
                }
            },
            Err(e) if e.is_unauthorized() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Earnings aggregates unavailable");
                None
            }
        };

        let withdrawals = withdrawals
            .into_iter()
            .filter_map(|record| match Withdrawal::try_from(record) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable withdrawal");
                    None
                }
            })
            .collect::<Vec<_>>();

        {
            let mut state = self.merge_guard(scope.epoch).ok_or(ClientError::NoSession)?;
            state.withdrawals = withdrawals;
            state.server = server;
            state.server_basis = basis;
            state.loaded = true;
        }
        Ok(self.recompute())
    }

    /// Record a withdrawal created during the session at `epoch`
    pub(crate) fn push_withdrawal(&self, epoch: u64, withdrawal: Withdrawal) {
        if let Some(mut state) = self.merge_guard(epoch) {
            state.withdrawals.retain(|w| w.id != withdrawal.id);
            state.withdrawals.push(withdrawal);
        }
        self.recompute();
    }
}

fn history_ids(history: &[Order]) -> Vec<String> {
    let mut ids: Vec<String> = history.iter().map(|o| o.id.clone()).collect();
    ids.sort_unstable();
    ids
}
