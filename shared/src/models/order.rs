//! Order Model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::decode::{self, DecodeError};

const RECORD: &str = "order";

/// Order lifecycle status
///
/// Transitions only move forward:
/// `Pending → Accepted → (Ongoing →) Completed`, or to `Cancelled` from
/// `Pending`, `Accepted` or `Ongoing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Ongoing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Ongoing => "ongoing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Accepted or ongoing: held by a driver and not finished
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Accepted | OrderStatus::Ongoing)
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Accepted => 1,
            OrderStatus::Ongoing => 2,
            OrderStatus::Completed | OrderStatus::Cancelled => 3,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "waiting" => Ok(OrderStatus::Pending),
            "accepted" => Ok(OrderStatus::Accepted),
            "ongoing" | "on_going" | "in_progress" | "picked_up" => Ok(OrderStatus::Ongoing),
            "completed" | "done" | "finished" => Ok(OrderStatus::Completed),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(DecodeError::UnknownStatus {
                record: RECORD,
                value: other.to_string(),
            }),
        }
    }
}

/// Customer nested under an order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Fare bracket nested under an order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistanceOptionRecord {
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub distance_km: Option<Value>,
}

/// Order as sent by the backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub driver_id: Option<Value>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub customer: Option<CustomerRecord>,
    #[serde(default)]
    pub pickup_location: Option<String>,
    #[serde(default)]
    pub drop_location: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub distance_km: Option<Value>,
    #[serde(default)]
    pub distance: Option<Value>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub distance_option: Option<DistanceOptionRecord>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub accepted_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Validated order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    /// Set once by the backend when a driver's accept wins
    pub driver_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub pickup_location: String,
    pub drop_location: String,
    pub distance_km: Option<Decimal>,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Whether the backend attributes this order to `driver_id`
    ///
    /// Orders served from a driver-scoped endpoint without a `driver_id`
    /// count as the caller's own once they have left `Pending`.
    pub fn is_held_by(&self, driver_id: &str) -> bool {
        match &self.driver_id {
            Some(holder) => holder == driver_id,
            None => self.status != OrderStatus::Pending,
        }
    }

    /// Still open for any driver to claim
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Pending && self.driver_id.is_none()
    }

    /// Moment the fare was earned, for daily and monthly earnings
    pub fn settled_at(&self) -> DateTime<Utc> {
        self.completed_at
            .or(self.accepted_at)
            .unwrap_or(self.created_at)
    }
}

impl TryFrom<OrderRecord> for Order {
    type Error = DecodeError;

    fn try_from(record: OrderRecord) -> Result<Self, Self::Error> {
        let id = decode::id(
            decode::required(record.id.as_ref(), RECORD, "id")?,
            RECORD,
            "id",
        )?;
        let status: OrderStatus =
            decode::required(decode::text(record.status), RECORD, "status")?.parse()?;
        let driver_id = decode::optional_id(record.driver_id.as_ref(), RECORD, "driver_id")?;

        let option = record.distance_option.unwrap_or_default();
        let price = match decode::optional_decimal(record.price.as_ref(), RECORD, "price")? {
            Some(price) => price,
            None => decode::optional_decimal(option.price.as_ref(), RECORD, "distance_option.price")?
                .ok_or(DecodeError::missing(RECORD, "price"))?,
        };
        if price.is_sign_negative() {
            return Err(DecodeError::invalid(RECORD, "price", "negative fare"));
        }

        let distance_km = match decode::optional_decimal(record.distance_km.as_ref(), RECORD, "distance_km")? {
            Some(d) => Some(d),
            None => match decode::optional_decimal(record.distance.as_ref(), RECORD, "distance")? {
                Some(d) => Some(d),
                None => decode::optional_decimal(
                    option.distance_km.as_ref(),
                    RECORD,
                    "distance_option.distance_km",
                )?,
            },
        };

        let customer = record.customer.unwrap_or_default();
        let customer_name = decode::text(record.customer_name)
            .or_else(|| decode::text(customer.name))
            .unwrap_or_default();
        let customer_phone =
            decode::text(record.customer_phone).or_else(|| decode::text(customer.phone));

        let created_at = decode::timestamp(
            &decode::required(record.created_at, RECORD, "created_at")?,
            RECORD,
            "created_at",
        )?;

        Ok(Self {
            id,
            status,
            driver_id,
            customer_name,
            customer_phone,
            pickup_location: decode::text(record.pickup_location).unwrap_or_default(),
            drop_location: decode::text(record.drop_location)
                .or_else(|| decode::text(record.destination))
                .unwrap_or_default(),
            distance_km,
            price,
            created_at,
            accepted_at: decode::optional_timestamp(
                record.accepted_at.as_deref(),
                RECORD,
                "accepted_at",
            )?,
            completed_at: decode::optional_timestamp(
                record.completed_at.as_deref(),
                RECORD,
                "completed_at",
            )?,
        })
    }
}

impl From<&Order> for OrderRecord {
    fn from(order: &Order) -> Self {
        Self {
            id: Some(Value::String(order.id.clone())),
            status: Some(order.status.as_str().to_string()),
            driver_id: order.driver_id.clone().map(Value::String),
            customer_name: Some(order.customer_name.clone()),
            customer_phone: order.customer_phone.clone(),
            customer: None,
            pickup_location: Some(order.pickup_location.clone()),
            drop_location: Some(order.drop_location.clone()),
            destination: None,
            distance_km: order.distance_km.map(|d| Value::String(d.to_string())),
            distance: None,
            price: Some(Value::String(order.price.to_string())),
            distance_option: None,
            created_at: Some(order.created_at.to_rfc3339()),
            accepted_at: order.accepted_at.map(|t| t.to_rfc3339()),
            completed_at: order.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> OrderRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_full_order() {
        let order = Order::try_from(record(json!({
            "id": 12,
            "status": "accepted",
            "driver_id": 3,
            "customer_name": "Siti",
            "customer_phone": "0812",
            "pickup_location": "Pasar Beringharjo",
            "drop_location": "Malioboro",
            "distance_km": "2.5",
            "price": 15000,
            "created_at": "2024-03-01 09:00:00",
            "accepted_at": "2024-03-01T09:05:00Z"
        })))
        .unwrap();

        assert_eq!(order.id, "12");
        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.driver_id.as_deref(), Some("3"));
        assert_eq!(order.price, Decimal::from(15000));
        assert_eq!(order.distance_km, Some(Decimal::new(25, 1)));
        assert!(order.accepted_at.is_some());
        assert!(order.completed_at.is_none());
    }

    #[test]
    fn test_decode_uses_nested_fallbacks() {
        let order = Order::try_from(record(json!({
            "id": "o-9",
            "status": "pending",
            "customer": {"name": "Andi", "phone": "0813"},
            "pickup_location": "Tugu",
            "destination": "Kraton",
            "distance_option": {"price": "18000.00", "distance_km": 3},
            "created_at": "2024-03-01T08:00:00+07:00"
        })))
        .unwrap();

        assert_eq!(order.customer_name, "Andi");
        assert_eq!(order.customer_phone.as_deref(), Some("0813"));
        assert_eq!(order.drop_location, "Kraton");
        assert_eq!(order.price, Decimal::from(18000));
        assert_eq!(order.distance_km, Some(Decimal::from(3)));
        assert!(order.is_open());
    }

    #[test]
    fn test_missing_price_is_an_error_not_zero() {
        let err = Order::try_from(record(json!({
            "id": 1,
            "status": "completed",
            "created_at": "2024-03-01 09:00:00"
        })))
        .unwrap_err();
        assert_eq!(err, DecodeError::missing("order", "price"));
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = Order::try_from(record(json!({
            "id": 1,
            "status": "teleported",
            "price": 1000,
            "created_at": "2024-03-01 09:00:00"
        })))
        .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownStatus { .. }));
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Accepted.can_transition_to(Completed));
        assert!(Accepted.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Accepted));
        assert!(!Accepted.can_transition_to(Pending));
        assert!(Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_record_from_order_decodes_back() {
        let original = Order::try_from(record(json!({
            "id": 5,
            "status": "completed",
            "driver_id": "d-1",
            "customer_name": "Rina",
            "pickup_location": "A",
            "drop_location": "B",
            "price": 12000,
            "created_at": "2024-03-01 09:00:00",
            "completed_at": "2024-03-01 09:30:00"
        })))
        .unwrap();
        let decoded = Order::try_from(OrderRecord::from(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_is_held_by() {
        let mut order = Order::try_from(record(json!({
            "id": 5,
            "status": "accepted",
            "price": 12000,
            "created_at": "2024-03-01 09:00:00"
        })))
        .unwrap();
        assert!(order.is_held_by("d-1"));
        order.driver_id = Some("d-2".into());
        assert!(!order.is_held_by("d-1"));
    }
}
