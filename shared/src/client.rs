//! Request/response bodies of the dispatch REST API
//!
//! Collection endpoints are inconsistent about wrapping: some return
//! `{ "orders": [...] }`, some a bare array. The `*Response` enums accept
//! both and hand back the list.

use serde::{Deserialize, Serialize};

use crate::models::{EarningsRecord, OrderRecord, Role, UserRecord, WithdrawalRecord};

// =============================================================================
// Auth API DTOs
// =============================================================================

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// Login response data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserRecord,
}

/// `GET profile`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileResponse {
    Wrapped { user: UserRecord },
    Bare(UserRecord),
}

impl ProfileResponse {
    pub fn into_user(self) -> UserRecord {
        match self {
            ProfileResponse::Wrapped { user } | ProfileResponse::Bare(user) => user,
        }
    }
}

// =============================================================================
// Driver API DTOs
// =============================================================================

/// `GET driver/orders`, `GET driver/{id}/orders`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrdersResponse {
    Wrapped { orders: Vec<OrderRecord> },
    Bare(Vec<OrderRecord>),
}

impl OrdersResponse {
    pub fn into_records(self) -> Vec<OrderRecord> {
        match self {
            OrdersResponse::Wrapped { orders } | OrdersResponse::Bare(orders) => orders,
        }
    }
}

/// `GET driver/withdrawals`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WithdrawalsResponse {
    Wrapped { withdrawals: Vec<WithdrawalRecord> },
    Bare(Vec<WithdrawalRecord>),
}

impl WithdrawalsResponse {
    pub fn into_records(self) -> Vec<WithdrawalRecord> {
        match self {
            WithdrawalsResponse::Wrapped { withdrawals } | WithdrawalsResponse::Bare(withdrawals) => {
                withdrawals
            }
        }
    }
}

/// `POST driver/withdrawals`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WithdrawalResponse {
    Wrapped { withdrawal: WithdrawalRecord },
    Bare(WithdrawalRecord),
}

impl WithdrawalResponse {
    pub fn into_record(self) -> WithdrawalRecord {
        match self {
            WithdrawalResponse::Wrapped { withdrawal } | WithdrawalResponse::Bare(withdrawal) => {
                withdrawal
            }
        }
    }
}

/// `GET driver/earnings`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EarningsResponse {
    Wrapped { earnings: EarningsRecord },
    Bare(EarningsRecord),
}

impl EarningsResponse {
    pub fn into_record(self) -> EarningsRecord {
        match self {
            EarningsResponse::Wrapped { earnings } | EarningsResponse::Bare(earnings) => earnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_orders_response_shapes() {
        let wrapped: OrdersResponse =
            serde_json::from_value(json!({"orders": [{"id": 1}, {"id": 2}]})).unwrap();
        let bare: OrdersResponse = serde_json::from_value(json!([{"id": 1}])).unwrap();
        assert_eq!(wrapped.into_records().len(), 2);
        assert_eq!(bare.into_records().len(), 1);
    }

    #[test]
    fn test_profile_response_shapes() {
        let wrapped: ProfileResponse =
            serde_json::from_value(json!({"user": {"id": 1, "role": "driver"}})).unwrap();
        assert_eq!(
            wrapped.into_user().role.as_deref(),
            Some("driver")
        );
        let bare: ProfileResponse =
            serde_json::from_value(json!({"id": 2, "role": "admin"})).unwrap();
        assert_eq!(bare.into_user().role.as_deref(), Some("admin"));
    }
}
