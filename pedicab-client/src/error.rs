//! Client error types

use shared::response::EnvelopeError;
use shared::{DecodeError, ErrorCategory, ErrorCode};
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Could not reach the backend (connect failure, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Credential rejected or expired
    #[error("Authentication required")]
    Unauthorized,

    /// Login refused
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account exists but belongs to another role
    #[error("Account role is {actual}, expected {expected}")]
    RoleMismatch {
        expected: shared::models::Role,
        actual: shared::models::Role,
    },

    /// Permission denied
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Contended resource already claimed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {message}")]
    Validation { code: ErrorCode, message: String },

    /// Action not allowed in the current local state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No session established
    #[error("No active session")]
    NoSession,

    /// Response could not be decoded into a domain model
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid response format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Session storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Backend reported a coded error
    #[error("API error {code}: {message}")]
    Api { code: ErrorCode, message: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized)
    }

    /// Network-level failures the user may simply retry
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ClientError::Api { code, .. } => code.category() == ErrorCategory::System,
            ClientError::Internal(_) => true,
            _ => false,
        }
    }

    /// Stable code for the views
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Http(e) if e.is_timeout() => ErrorCode::TimeoutError,
            ClientError::Http(_) | ClientError::Network(_) => ErrorCode::NetworkError,
            ClientError::Unauthorized => ErrorCode::NotAuthenticated,
            ClientError::InvalidCredentials => ErrorCode::InvalidCredentials,
            ClientError::RoleMismatch { .. } => ErrorCode::RoleMismatch,
            ClientError::Forbidden(_) => ErrorCode::PermissionDenied,
            ClientError::NotFound(_) => ErrorCode::NotFound,
            ClientError::Conflict(_) => ErrorCode::Conflict,
            ClientError::Validation { code, .. } => *code,
            ClientError::InvalidState(_) => ErrorCode::OrderInvalidState,
            ClientError::NoSession => ErrorCode::NotAuthenticated,
            ClientError::Decode(_)
            | ClientError::InvalidResponse(_)
            | ClientError::Serialization(_) => ErrorCode::InvalidFormat,
            ClientError::Storage(_) => ErrorCode::StorageError,
            ClientError::Api { code, .. } => *code,
            ClientError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Text shown inline to the view that initiated the action
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation { message, .. } => message.clone(),
            ClientError::Api { message, .. } if !message.is_empty() => message.clone(),
            ClientError::Forbidden(m) | ClientError::NotFound(m) | ClientError::Conflict(m)
                if !m.is_empty() =>
            {
                m.clone()
            }
            other => other.code().message().to_string(),
        }
    }
}

impl From<EnvelopeError> for ClientError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Rejected(message) => ClientError::Api {
                code: ErrorCode::Unknown,
                message,
            },
            EnvelopeError::Malformed(message) => ClientError::InvalidResponse(message),
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
