//! Driver presence Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decode::{self, DecodeError};

/// A device fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64, timestamp: DateTime<Utc>) -> Self {
        Self { lat, lng, timestamp }
    }

    /// Latitude and longitude are finite and within range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Driver availability plus last reported location
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverPresence {
    pub is_online: bool,
    pub last_known_location: Option<GeoPoint>,
}

/// Body of `GET/PUT driver/online-status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnlineStatusRecord {
    #[serde(default, alias = "online", alias = "status")]
    pub is_online: Option<Value>,
}

impl OnlineStatusRecord {
    pub fn new(is_online: bool) -> Self {
        Self {
            is_online: Some(Value::Bool(is_online)),
        }
    }

    pub fn decode(&self) -> Result<bool, DecodeError> {
        decode::boolean(
            decode::required(self.is_online.as_ref(), "online_status", "is_online")?,
            "online_status",
            "is_online",
        )
    }
}

/// Body of `POST driver/location`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<GeoPoint> for LocationUpdate {
    fn from(point: GeoPoint) -> Self {
        Self {
            latitude: point.lat,
            longitude: point.lng,
            timestamp: point.timestamp,
        }
    }
}
