//! Unified error codes for the dispatch client
//!
//! Codes are grouped by range:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Driver / presence errors
//! - 4xxx: Order errors
//! - 5xxx: Withdrawal errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Represented as `u16` on the wire so the backend and the views can share
/// the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists or is contended
    Conflict = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Response could not be decoded
    InvalidFormat = 6,
    /// Required field missing
    RequiredField = 7,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Invalid credentials
    InvalidCredentials = 1002,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,
    /// Session has expired
    SessionExpired = 1005,
    /// Account is disabled
    AccountDisabled = 1007,
    /// Account role does not match the login surface
    RoleMismatch = 1008,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Driver role required
    DriverRequired = 2002,
    /// Admin role required
    AdminRequired = 2003,

    // ==================== 3xxx: Driver ====================
    /// Driver profile not found
    DriverNotFound = 3001,
    /// Driver is offline
    DriverOffline = 3002,
    /// Device location unavailable
    LocationUnavailable = 3003,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Order already accepted by another driver
    OrderAlreadyAccepted = 4002,
    /// Order already completed
    OrderAlreadyCompleted = 4003,
    /// Order already cancelled
    OrderAlreadyCancelled = 4004,
    /// Order is not assigned to this driver
    OrderNotAssigned = 4005,
    /// Order action not allowed in its current state
    OrderInvalidState = 4006,
    /// Driver already has an active order
    ActiveOrderExists = 4007,

    // ==================== 5xxx: Withdrawal ====================
    /// Withdrawal amount is not a positive number
    WithdrawalInvalidAmount = 5001,
    /// Withdrawal amount is below the minimum
    WithdrawalBelowMinimum = 5002,
    /// Withdrawal amount exceeds the available balance
    WithdrawalInsufficientBalance = 5003,
    /// Bank account details are invalid
    WithdrawalInvalidAccount = 5004,
    /// Withdrawal not found
    WithdrawalNotFound = 5005,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Network error
    NetworkError = 9003,
    /// Request timed out
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,
    /// Local storage error
    StorageError = 9401,
}

impl ErrorCode {
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::Conflict => "Resource was modified by someone else",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::InvalidFormat => "Unexpected response from server",
            ErrorCode::RequiredField => "Required field is missing",
            ErrorCode::ValueOutOfRange => "Value is out of range",

            // Auth
            ErrorCode::NotAuthenticated => "Please log in again",
            ErrorCode::InvalidCredentials => "Invalid email or password",
            ErrorCode::TokenExpired => "Session token has expired",
            ErrorCode::TokenInvalid => "Session token is invalid",
            ErrorCode::SessionExpired => "Session has expired",
            ErrorCode::AccountDisabled => "Account is disabled",
            ErrorCode::RoleMismatch => "This account cannot sign in here",

            // Permission
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::DriverRequired => "Driver account required",
            ErrorCode::AdminRequired => "Administrator account required",

            // Driver
            ErrorCode::DriverNotFound => "Driver profile not found",
            ErrorCode::DriverOffline => "Go online to receive orders",
            ErrorCode::LocationUnavailable => "Location is unavailable",

            // Order
            ErrorCode::OrderNotFound => "Order no longer exists",
            ErrorCode::OrderAlreadyAccepted => "Order already accepted by another driver",
            ErrorCode::OrderAlreadyCompleted => "Order has already been completed",
            ErrorCode::OrderAlreadyCancelled => "Order has been cancelled",
            ErrorCode::OrderNotAssigned => "Order is not assigned to you",
            ErrorCode::OrderInvalidState => "Order cannot be changed in its current state",
            ErrorCode::ActiveOrderExists => "Finish your active order first",

            // Withdrawal
            ErrorCode::WithdrawalInvalidAmount => "Withdrawal amount must be greater than zero",
            ErrorCode::WithdrawalBelowMinimum => "Withdrawal amount is below the minimum",
            ErrorCode::WithdrawalInsufficientBalance => "Insufficient balance",
            ErrorCode::WithdrawalInvalidAccount => "Bank account details are invalid",
            ErrorCode::WithdrawalNotFound => "Withdrawal not found",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::NetworkError => "Network error, please retry",
            ErrorCode::TimeoutError => "Request timed out, please retry",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::StorageError => "Local storage error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::Conflict),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::InvalidFormat),
            7 => Ok(ErrorCode::RequiredField),
            8 => Ok(ErrorCode::ValueOutOfRange),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1002 => Ok(ErrorCode::InvalidCredentials),
            1003 => Ok(ErrorCode::TokenExpired),
            1004 => Ok(ErrorCode::TokenInvalid),
            1005 => Ok(ErrorCode::SessionExpired),
            1007 => Ok(ErrorCode::AccountDisabled),
            1008 => Ok(ErrorCode::RoleMismatch),

            // Permission
            2001 => Ok(ErrorCode::PermissionDenied),
            2002 => Ok(ErrorCode::DriverRequired),
            2003 => Ok(ErrorCode::AdminRequired),

            // Driver
            3001 => Ok(ErrorCode::DriverNotFound),
            3002 => Ok(ErrorCode::DriverOffline),
            3003 => Ok(ErrorCode::LocationUnavailable),

            // Order
            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::OrderAlreadyAccepted),
            4003 => Ok(ErrorCode::OrderAlreadyCompleted),
            4004 => Ok(ErrorCode::OrderAlreadyCancelled),
            4005 => Ok(ErrorCode::OrderNotAssigned),
            4006 => Ok(ErrorCode::OrderInvalidState),
            4007 => Ok(ErrorCode::ActiveOrderExists),

            // Withdrawal
            5001 => Ok(ErrorCode::WithdrawalInvalidAmount),
            5002 => Ok(ErrorCode::WithdrawalBelowMinimum),
            5003 => Ok(ErrorCode::WithdrawalInsufficientBalance),
            5004 => Ok(ErrorCode::WithdrawalInvalidAccount),
            5005 => Ok(ErrorCode::WithdrawalNotFound),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),
            9401 => Ok(ErrorCode::StorageError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}
