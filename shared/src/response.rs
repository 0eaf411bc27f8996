//! API Response envelope
//!
//! Most dispatch endpoints wrap their payload:
//! ```json
//! {
//!     "success": true,
//!     "message": "OK",
//!     "data": { ... }
//! }
//! ```
//! Older endpoints return the payload bare. [`ApiResponse::unwrap_value`]
//! accepts both shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unified API response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the backend considers the call successful
    #[serde(default = "default_success")]
    pub success: bool,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response data (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn default_success() -> bool {
    true
}

/// Why an envelope could not be unwrapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `success: false` with the backend's message
    Rejected(String),
    /// The payload did not match the expected shape
    Malformed(String),
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Extract the payload from either a wrapped or a bare response body
    pub fn unwrap_value(value: Value) -> Result<T, EnvelopeError> {
        let is_envelope = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("success") || obj.contains_key("data"));

        if !is_envelope {
            return serde_json::from_value(value)
                .map_err(|e| EnvelopeError::Malformed(e.to_string()));
        }

        let envelope: ApiResponse<Value> = serde_json::from_value(value)
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if !envelope.success {
            return Err(EnvelopeError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "Request rejected".to_string()),
            ));
        }

        // `data: null` on endpoints that return nothing
        let data = envelope.data.unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        token: String,
    }

    #[test]
    fn test_unwrap_wrapped_and_bare() {
        let wrapped = json!({"success": true, "data": {"token": "abc"}});
        let bare = json!({"token": "abc"});
        assert_eq!(
            ApiResponse::<Payload>::unwrap_value(wrapped).unwrap(),
            Payload {
                token: "abc".into()
            }
        );
        assert_eq!(
            ApiResponse::<Payload>::unwrap_value(bare).unwrap(),
            Payload {
                token: "abc".into()
            }
        );
    }

    #[test]
    fn test_unwrap_rejected() {
        let body = json!({"success": false, "message": "Driver not found"});
        assert_eq!(
            ApiResponse::<Payload>::unwrap_value(body),
            Err(EnvelopeError::Rejected("Driver not found".into()))
        );
    }

    #[test]
    fn test_unwrap_unit_payload() {
        let body = json!({"success": true, "message": "Location updated"});
        assert!(ApiResponse::<()>::unwrap_value(body).is_ok());
    }

    #[test]
    fn test_unwrap_malformed() {
        let body = json!({"success": true, "data": {"nope": 1}});
        assert!(matches!(
            ApiResponse::<Payload>::unwrap_value(body),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
