//! Withdrawal requests
//!
//! Input is validated before anything goes on the wire; a rejected request
//! never reaches the authority.

use crate::earnings::EarningsAggregator;
use crate::http::DispatchApi;
use crate::session::SessionStore;
use crate::{ClientError, ClientResult};
use rust_decimal::Decimal;
use shared::ErrorCode;
use shared::models::{NewWithdrawal, Withdrawal};
use std::sync::Arc;

// ── Field limits ────────────────────────────────────────────────────

/// Bank names
pub const MAX_BANK_NAME_LEN: usize = 100;

/// Account holder names
pub const MAX_ACCOUNT_NAME_LEN: usize = 200;

/// Account numbers, digits only
pub const MIN_ACCOUNT_NUMBER_LEN: usize = 6;
pub const MAX_ACCOUNT_NUMBER_LEN: usize = 20;

/// Withdrawal form input
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
}

fn invalid(code: ErrorCode, message: impl Into<String>) -> ClientError {
    ClientError::validation(code, message)
}

/// Validate that a required string is non-empty and within the length limit.
fn validate_required_text(value: &str, field: &str, max_len: usize) -> ClientResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(
            ErrorCode::WithdrawalInvalidAccount,
            format!("{field} must not be empty"),
        ));
    }
    if value.chars().count() > max_len {
        return Err(invalid(
            ErrorCode::WithdrawalInvalidAccount,
            format!("{field} is too long (max {max_len} chars)"),
        ));
    }
    Ok(())
}

/// Check a request and turn it into the wire body
///
/// `available` is the spendable balance when an earnings snapshot is known.
pub fn validate(
    request: &WithdrawalRequest,
    minimum: Decimal,
    available: Option<Decimal>,
) -> ClientResult<NewWithdrawal> {
    if request.amount <= Decimal::ZERO {
        return Err(invalid(
            ErrorCode::WithdrawalInvalidAmount,
            "Amount must be greater than zero",
        ));
    }
    if request.amount < minimum {
        return Err(invalid(
            ErrorCode::WithdrawalBelowMinimum,
            format!("Minimum withdrawal is {minimum}"),
        ));
    }
    if let Some(available) = available
        && request.amount > available
    {
        return Err(invalid(
            ErrorCode::WithdrawalInsufficientBalance,
            format!("Amount exceeds available balance of {available}"),
        ));
    }

    validate_required_text(&request.bank_name, "Bank name", MAX_BANK_NAME_LEN)?;
    validate_required_text(&request.account_name, "Account name", MAX_ACCOUNT_NAME_LEN)?;

    let account_number: String = request
        .account_number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if !account_number.chars().all(|c| c.is_ascii_digit())
        || !(MIN_ACCOUNT_NUMBER_LEN..=MAX_ACCOUNT_NUMBER_LEN).contains(&account_number.len())
    {
        return Err(invalid(
            ErrorCode::WithdrawalInvalidAccount,
            format!(
                "Account number must be {MIN_ACCOUNT_NUMBER_LEN}-{MAX_ACCOUNT_NUMBER_LEN} digits"
            ),
        ));
    }

    Ok(NewWithdrawal {
        amount: request.amount,
        bank_name: request.bank_name.trim().to_string(),
        account_number,
        account_name: request.account_name.trim().to_string(),
    })
}

pub struct WithdrawalService {
    api: Arc<dyn DispatchApi>,
    session: Arc<SessionStore>,
    earnings: Arc<EarningsAggregator>,
    minimum: Decimal,
}

impl WithdrawalService {
    pub fn new(
        api: Arc<dyn DispatchApi>,
        session: Arc<SessionStore>,
        earnings: Arc<EarningsAggregator>,
        minimum: Decimal,
    ) -> Self {
        Self {
            api,
            session,
            earnings,
            minimum,
        }
    }

    /// Validate, submit and record a withdrawal
    pub async fn submit(&self, request: &WithdrawalRequest) -> ClientResult<Withdrawal> {
        let scope = self.session.driver_scope()?;
        let body = validate(request, self.minimum, self.earnings.available_balance())?;

        let result = self.api.create_withdrawal(&body).await;
        let record = self.session.check(scope.epoch, result)?;
        let withdrawal = Withdrawal::try_from(record)?;
        tracing::info!(
            driver_id = %scope.driver_key(),
            withdrawal_id = %withdrawal.id,
            amount = %withdrawal.amount,
            "Withdrawal requested"
        );
        self.earnings.push_withdrawal(scope.epoch, withdrawal.clone());
        Ok(withdrawal)
    }

    /// Reload withdrawals (and aggregates) from the authority
    pub async fn list(&self) -> ClientResult<Vec<Withdrawal>> {
        self.earnings.refresh().await?;
        Ok(self.earnings.withdrawals())
    }
}
