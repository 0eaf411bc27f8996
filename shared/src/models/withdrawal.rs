//! Withdrawal Model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::decode::{self, DecodeError};

const RECORD: &str = "withdrawal";

/// Withdrawal status, driven only by the admin approval flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl WithdrawalStatus {
    /// Money has left (or is committed to leave) the driver's balance
    pub fn is_paid_out(&self) -> bool {
        matches!(self, WithdrawalStatus::Approved | WithdrawalStatus::Completed)
    }
}

impl FromStr for WithdrawalStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(WithdrawalStatus::Pending),
            "approved" => Ok(WithdrawalStatus::Approved),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            "completed" | "paid" => Ok(WithdrawalStatus::Completed),
            other => Err(DecodeError::UnknownStatus {
                record: RECORD,
                value: other.to_string(),
            }),
        }
    }
}

/// Withdrawal as sent by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub account_number: Option<Value>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Validated withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: String,
    pub amount: Decimal,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WithdrawalRecord> for Withdrawal {
    type Error = DecodeError;

    fn try_from(record: WithdrawalRecord) -> Result<Self, Self::Error> {
        let id = decode::id(
            decode::required(record.id.as_ref(), RECORD, "id")?,
            RECORD,
            "id",
        )?;
        let amount = decode::decimal(
            decode::required(record.amount.as_ref(), RECORD, "amount")?,
            RECORD,
            "amount",
        )?;
        let status: WithdrawalStatus =
            decode::required(decode::text(record.status), RECORD, "status")?.parse()?;
        let account_number = match record.account_number.as_ref() {
            Some(v) => decode::id(v, RECORD, "account_number")?,
            None => String::new(),
        };
        let created_at = decode::timestamp(
            &decode::required(record.created_at, RECORD, "created_at")?,
            RECORD,
            "created_at",
        )?;

        Ok(Self {
            id,
            amount,
            bank_name: decode::text(record.bank_name).unwrap_or_default(),
            account_number,
            account_name: decode::text(record.account_name).unwrap_or_default(),
            status,
            created_at,
        })
    }
}

impl From<&Withdrawal> for WithdrawalRecord {
    fn from(w: &Withdrawal) -> Self {
        Self {
            id: Some(Value::String(w.id.clone())),
            amount: Some(Value::String(w.amount.to_string())),
            bank_name: Some(w.bank_name.clone()),
            account_number: Some(Value::String(w.account_number.clone())),
            account_name: Some(w.account_name.clone()),
            status: Some(
                match w.status {
                    WithdrawalStatus::Pending => "pending",
                    WithdrawalStatus::Approved => "approved",
                    WithdrawalStatus::Rejected => "rejected",
                    WithdrawalStatus::Completed => "completed",
                }
                .to_string(),
            ),
            created_at: Some(w.created_at.to_rfc3339()),
        }
    }
}

/// Body of `POST driver/withdrawals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWithdrawal {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
}
