//! Accept, complete and cancel against the authority
//!
//! Each order moves through
//! `Available → Claiming → {Mine | LostToOther} → Completing → Completed`.
//! The client never locks anything: the authority picks the single winner
//! and whatever it answers overwrites the local view.

use crate::earnings::EarningsAggregator;
use crate::http::DispatchApi;
use crate::orders::OrderSyncEngine;
use crate::session::{SessionScope, SessionStore};
use crate::{ClientError, ClientResult};
use shared::ErrorCode;
use shared::models::{Order, OrderStatus};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// Client-observed state of one order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimState {
    Available,
    Claiming,
    Mine,
    LostToOther,
    /// The authority no longer knows the order
    Gone,
    Completing,
    Completed,
    Cancelling,
    Cancelled,
}

impl ClaimState {
    /// A request for this order is in flight
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ClaimState::Claiming | ClaimState::Completing | ClaimState::Cancelling
        )
    }

    // outcomes that cannot be read back from the partition
    fn is_sticky(&self) -> bool {
        matches!(
            self,
            ClaimState::LostToOther | ClaimState::Gone | ClaimState::Completed | ClaimState::Cancelled
        )
    }
}

/// Proof that the driver confirmed an accept
///
/// Only [`AcceptanceCoordinator::prepare_accept`] hands these out, and a
/// ticket dies with the session that issued it.
#[derive(Debug, Clone)]
pub struct AcceptTicket {
    order: Order,
    epoch: u64,
}

impl AcceptTicket {
    pub fn order_id(&self) -> &str {
        &self.order.id
    }

    /// The order as shown in the confirmation step
    pub fn order(&self) -> &Order {
        &self.order
    }
}

/// Result of an accept the authority answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    LostToOther { message: String },
    Gone { message: String },
}

#[derive(Default)]
struct ClaimTable {
    epoch: u64,
    states: HashMap<String, ClaimState>,
}

pub struct AcceptanceCoordinator {
    api: Arc<dyn DispatchApi>,
    session: Arc<SessionStore>,
    orders: Arc<OrderSyncEngine>,
    earnings: Arc<EarningsAggregator>,
    claims: RwLock<ClaimTable>,
}

impl AcceptanceCoordinator {
    pub fn new(
        api: Arc<dyn DispatchApi>,
        session: Arc<SessionStore>,
        orders: Arc<OrderSyncEngine>,
        earnings: Arc<EarningsAggregator>,
    ) -> Self {
        Self {
            api,
            session,
            orders,
            earnings,
            claims: RwLock::new(ClaimTable::default()),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClaimTable> {
        self.claims.write().unwrap_or_else(|e| e.into_inner())
    }

    fn table_for(&self, epoch: u64) -> Option<RwLockWriteGuard<'_, ClaimTable>> {
        let mut table = self.write();
        if !self.session.is_current(epoch) {
            return None;
        }
        if table.epoch != epoch {
            *table = ClaimTable {
                epoch,
                states: HashMap::new(),
            };
        }
        Some(table)
    }

    fn resolve(&self, table: &ClaimTable, order_id: &str) -> Option<ClaimState> {
        let recorded = table.states.get(order_id).copied();
        if let Some(state) = recorded
            && state.is_pending()
        {
            return Some(state);
        }
        let partition = self.orders.partition();
        if partition.is_available(order_id) {
            Some(ClaimState::Available)
        } else if partition.is_active(order_id) {
            Some(ClaimState::Mine)
        } else if partition.is_completed(order_id) {
            Some(ClaimState::Completed)
        } else {
            recorded.filter(ClaimState::is_sticky)
        }
    }

    /// State of `order_id` for the live session
    pub fn claim_state(&self, order_id: &str) -> Option<ClaimState> {
        let table = self.claims.read().unwrap_or_else(|e| e.into_inner());
        if table.epoch != self.session.epoch() {
            return self.resolve(&ClaimTable::default(), order_id);
        }
        self.resolve(&table, order_id)
    }

    /// States of every known order
    pub fn claim_states(&self) -> HashMap<String, ClaimState> {
        let table = self.claims.read().unwrap_or_else(|e| e.into_inner());
        let live = table.epoch == self.session.epoch();
        let mut ids: Vec<String> = self.orders.partition().iter().map(|o| o.id.clone()).collect();
        if live {
            ids.extend(table.states.keys().cloned());
        }
        let empty = ClaimTable::default();
        let table = if live { &*table } else { &empty };
        ids.into_iter()
            .filter_map(|id| self.resolve(table, &id).map(|state| (id, state)))
            .collect()
    }

    /// Order currently being accepted, if any
    pub fn accepting_order_id(&self) -> Option<String> {
        self.claim_states()
            .into_iter()
            .find(|(_, state)| *state == ClaimState::Claiming)
            .map(|(id, _)| id)
    }

    /// Confirmation step; the ticket is required by [`Self::accept`]
    pub fn prepare_accept(&self, order_id: &str) -> ClientResult<AcceptTicket> {
        let scope = self.session.driver_scope()?;
        match self.claim_state(order_id) {
            Some(ClaimState::Available) => {}
            Some(state) => {
                return Err(ClientError::InvalidState(format!(
                    "order {order_id} is {state:?}, not available"
                )));
            }
            None => return Err(ClientError::NotFound(format!("order {order_id}"))),
        }
        let order = self
            .orders
            .partition()
            .find(order_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("order {order_id}")))?;
        Ok(AcceptTicket {
            order,
            epoch: scope.epoch,
        })
    }

    /// Move `order_id` into `to` if it is in one of `allowed`
    fn begin(
        &self,
        scope: &SessionScope,
        order_id: &str,
        allowed: &[ClaimState],
        to: ClaimState,
    ) -> ClientResult<()> {
        let mut table = self.table_for(scope.epoch).ok_or(ClientError::NoSession)?;
        let current = self.resolve(&table, order_id);
        match current {
            Some(state) if allowed.contains(&state) => {
                table.states.insert(order_id.to_string(), to);
                Ok(())
            }
            Some(ClaimState::Completed) => Err(ClientError::InvalidState(
                ErrorCode::OrderAlreadyCompleted.message().to_string(),
            )),
            Some(state) if state.is_pending() => Err(ClientError::InvalidState(format!(
                "order {order_id} already has a request in flight"
            ))),
            Some(state) => Err(ClientError::InvalidState(format!(
                "order {order_id} is {state:?}"
            ))),
            None => Err(ClientError::NotFound(format!("order {order_id}"))),
        }
    }

    /// Record the end of a request; `None` falls back to the partition
    fn settle(&self, epoch: u64, order_id: &str, state: Option<ClaimState>) -> bool {
        let Some(mut table) = self.table_for(epoch) else {
            return false;
        };
        match state {
            Some(state) => table.states.insert(order_id.to_string(), state),
            None => table.states.remove(order_id),
        };
        true
    }

    /// Reconcile with the authority after a state-changing answer
    async fn reconcile(&self) {
        if let Err(e) = self.orders.refresh().await {
            tracing::warn!(error = %e, "Refresh after order action failed");
        }
        self.earnings.recompute();
    }

    /// Claim the order confirmed by `ticket`
    ///
    /// Conflict and not-found are outcomes, not errors. A transport failure
    /// returns the order to `Available` without a refresh.
    pub async fn accept(&self, ticket: AcceptTicket) -> ClientResult<AcceptOutcome> {
        let scope = self.session.driver_scope()?;
        if ticket.epoch != scope.epoch {
            return Err(ClientError::InvalidState(
                "confirmation belongs to an ended session".into(),
            ));
        }
        let order_id = ticket.order.id.as_str();
        self.begin(&scope, order_id, &[ClaimState::Available], ClaimState::Claiming)?;
        tracing::info!(order_id, driver_id = %scope.driver_key(), "Accepting order");

        let result = self.api.accept_order(order_id).await;
        let result = self.session.check(scope.epoch, result);
        if !self.session.is_current(scope.epoch) {
            return Err(result.err().unwrap_or(ClientError::NoSession));
        }

        match result {
            Ok(()) => {
                self.orders
                    .provisional(scope.epoch, order_id, OrderStatus::Accepted);
                self.settle(scope.epoch, order_id, None);
                tracing::info!(order_id, "Order accepted");
                self.reconcile().await;
                Ok(AcceptOutcome::Accepted)
            }
            Err(ClientError::Conflict(message)) => {
                self.settle(scope.epoch, order_id, Some(ClaimState::LostToOther));
                self.orders.forget(scope.epoch, order_id);
                tracing::info!(order_id, "Order already taken by another driver");
                self.reconcile().await;
                Ok(AcceptOutcome::LostToOther {
                    message: non_empty(message, ErrorCode::OrderAlreadyAccepted),
                })
            }
            Err(ClientError::NotFound(message)) => {
                self.settle(scope.epoch, order_id, Some(ClaimState::Gone));
                self.orders.forget(scope.epoch, order_id);
                tracing::info!(order_id, "Order no longer exists");
                self.reconcile().await;
                Ok(AcceptOutcome::Gone {
                    message: non_empty(message, ErrorCode::OrderNotFound),
                })
            }
            Err(e) => {
                self.settle(scope.epoch, order_id, None);
                tracing::warn!(order_id, error = %e, "Accept failed, order left available");
                Err(e)
            }
        }
    }

    /// Finish an order held by this driver
    ///
    /// Calling it again on a completed order is refused locally.
    pub async fn complete(&self, order_id: &str) -> ClientResult<()> {
        self.finish(order_id, ClaimState::Completing, ClaimState::Completed)
            .await
    }

    /// Abandon an order held by this driver
    pub async fn cancel(&self, order_id: &str) -> ClientResult<()> {
        self.finish(order_id, ClaimState::Cancelling, ClaimState::Cancelled)
            .await
    }

    async fn finish(&self, order_id: &str, pending: ClaimState, done: ClaimState) -> ClientResult<()> {
        let scope = self.session.driver_scope()?;
        self.begin(&scope, order_id, &[ClaimState::Mine], pending)?;

        let result = match done {
            ClaimState::Completed => self.api.complete_order(order_id).await,
            _ => self.api.cancel_order(order_id).await,
        };
        let result = self.session.check(scope.epoch, result);
        if !self.session.is_current(scope.epoch) {
            return Err(result.err().unwrap_or(ClientError::NoSession));
        }

        match result {
            Ok(()) => {
                let status = match done {
                    ClaimState::Completed => OrderStatus::Completed,
                    _ => OrderStatus::Cancelled,
                };
                self.orders.provisional(scope.epoch, order_id, status);
                self.settle(scope.epoch, order_id, Some(done));
                tracing::info!(order_id, outcome = ?done, "Order finished");
                self.reconcile().await;
                Ok(())
            }
            Err(e @ (ClientError::Conflict(_) | ClientError::NotFound(_))) => {
                // the authority disagrees; its state wins
                self.settle(scope.epoch, order_id, None);
                tracing::warn!(order_id, error = %e, "Authority refused order action");
                self.reconcile().await;
                Err(e)
            }
            Err(e) => {
                self.settle(scope.epoch, order_id, None);
                tracing::warn!(order_id, error = %e, "Order action failed, order still active");
                Err(e)
            }
        }
    }
}

fn non_empty(message: String, fallback: ErrorCode) -> String {
    if message.trim().is_empty() {
        fallback.message().to_string()
    } else {
        message
    }
}
