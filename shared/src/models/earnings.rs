//! Earnings Model

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decode::{self, DecodeError};

const RECORD: &str = "earnings";

/// Derived earnings summary for one driver
///
/// Never edited in place; always recomputed from orders and withdrawals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSnapshot {
    pub total_earnings: Decimal,
    pub today_earnings: Decimal,
    pub monthly_earnings: Decimal,
    pub completed_trip_count: u32,
    pub today_trip_count: u32,
    /// Approved and completed withdrawals
    pub withdrawn_total: Decimal,
    /// Withdrawals still waiting for approval
    pub pending_withdrawal_total: Decimal,
    /// `total - withdrawn - pending`, never below zero
    pub available_balance: Decimal,
}

/// Aggregates as sent by `GET driver/earnings`; any field may be absent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarningsRecord {
    #[serde(default)]
    pub total_earnings: Option<Value>,
    #[serde(default)]
    pub today_earnings: Option<Value>,
    #[serde(default, alias = "month_earnings")]
    pub monthly_earnings: Option<Value>,
    #[serde(default, alias = "total_trips", alias = "completed_orders")]
    pub completed_trip_count: Option<Value>,
    #[serde(default, alias = "today_trips", alias = "today_orders")]
    pub today_trip_count: Option<Value>,
}

/// Decoded server aggregates; `None` means "not provided"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEarnings {
    pub total_earnings: Option<Decimal>,
    pub today_earnings: Option<Decimal>,
    pub monthly_earnings: Option<Decimal>,
    pub completed_trip_count: Option<u32>,
    pub today_trip_count: Option<u32>,
}

fn optional_count(value: Option<&Value>, field: &'static str) -> Result<Option<u32>, DecodeError> {
    match decode::optional_decimal(value, RECORD, field)? {
        None => Ok(None),
        Some(d) if d.fract().is_zero() => d
            .to_u32()
            .map(Some)
            .ok_or_else(|| DecodeError::invalid(RECORD, field, format!("`{d}` is not a count"))),
        Some(d) => Err(DecodeError::invalid(
            RECORD,
            field,
            format!("`{d}` is not a count"),
        )),
    }
}

impl TryFrom<EarningsRecord> for ServerEarnings {
    type Error = DecodeError;

    fn try_from(record: EarningsRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            total_earnings: decode::optional_decimal(
                record.total_earnings.as_ref(),
                RECORD,
                "total_earnings",
            )?,
            today_earnings: decode::optional_decimal(
                record.today_earnings.as_ref(),
                RECORD,
                "today_earnings",
            )?,
            monthly_earnings: decode::optional_decimal(
                record.monthly_earnings.as_ref(),
                RECORD,
                "monthly_earnings",
            )?,
            completed_trip_count: optional_count(
                record.completed_trip_count.as_ref(),
                "completed_trip_count",
            )?,
            today_trip_count: optional_count(record.today_trip_count.as_ref(), "today_trip_count")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_server_earnings() {
        let record: EarningsRecord = serde_json::from_value(json!({
            "total_earnings": "45000.00",
            "total_trips": 3
        }))
        .unwrap();
        let server = ServerEarnings::try_from(record).unwrap();
        assert_eq!(server.total_earnings, Some(Decimal::from(45000)));
        assert_eq!(server.completed_trip_count, Some(3));
        assert_eq!(server.today_earnings, None);
        assert_eq!(server.today_trip_count, None);
    }

    #[test]
    fn test_count_must_be_whole() {
        let record: EarningsRecord =
            serde_json::from_value(json!({"today_trips": 1.5})).unwrap();
        assert!(ServerEarnings::try_from(record).is_err());
    }
}
