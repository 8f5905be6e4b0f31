//! Unified error codes for the storefront core
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 4xxx: Order and resize errors
//! - 5xxx: Payment errors
//! - 6xxx: Wallet errors
//! - 7xxx: Instance and automation errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so the HTTP envelope
/// carries a stable number the frontend can switch on.
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
    /// State transition rejected or unique key collision
    Conflict = 4,
    /// Invalid request
    InvalidRequest = 5,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,
    /// Captcha check failed
    CaptchaFailed = 1008,

    // ==================== 2xxx: Permission ====================
    /// Permission denied or action blocked by policy
    PermissionDenied = 2001,
    /// Admin role required
    AdminRequired = 2003,
    /// Real-name verification required for this action
    RealNameRequired = 2101,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Order item not found
    OrderItemNotFound = 4002,
    /// Order total is zero or negative
    NoPaymentRequired = 4010,
    /// Resize target equals the current plan
    ResizeSamePlan = 4101,
    /// Resize switched off
    ResizeDisabled = 4102,
    /// Another resize is pending for the instance
    ResizeInProgress = 4103,
    /// Upstream host is not ready yet
    Provisioning = 4201,

    // ==================== 5xxx: Payment ====================
    /// Payment not found
    PaymentNotFound = 5001,
    /// Payment provider not registered
    PaymentProviderNotFound = 5002,
    /// Payment provider disabled
    PaymentProviderDisabled = 5003,
    /// Payment notify could not be verified
    PaymentVerifyFailed = 5004,

    // ==================== 6xxx: Wallet ====================
    /// Wallet debit would go negative
    InsufficientBalance = 6001,
    /// Wallet order not found
    WalletOrderNotFound = 6002,

    // ==================== 7xxx: Instance ====================
    /// VPS instance not found
    VpsNotFound = 7001,
    /// Automation backend call failed
    AutomationFailed = 7101,
    /// Automation backend call timed out
    AutomationTimeout = 7102,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Network error
    NetworkError = 9003,
    /// Timeout error
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Get the default message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            Self::Success => "Success",
            Self::Unknown => "Unknown error",
            Self::ValidationFailed => "Validation failed",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Conflict",
            Self::InvalidRequest => "Invalid request",

            // Auth
            Self::NotAuthenticated => "Not authenticated",
            Self::TokenExpired => "Token has expired",
            Self::TokenInvalid => "Token is invalid",
            Self::CaptchaFailed => "Captcha verification failed",

            // Permission
            Self::PermissionDenied => "Permission denied",
            Self::AdminRequired => "Admin role required",
            Self::RealNameRequired => "Real-name verification required",

            // Order
            Self::OrderNotFound => "Order not found",
            Self::OrderItemNotFound => "Order item not found",
            Self::NoPaymentRequired => "No payment required",
            Self::ResizeSamePlan => "Resize target is the same plan",
            Self::ResizeDisabled => "Resize is disabled",
            Self::ResizeInProgress => "Resize already in progress",
            Self::Provisioning => "Host is still provisioning",

            // Payment
            Self::PaymentNotFound => "Payment not found",
            Self::PaymentProviderNotFound => "Payment provider not found",
            Self::PaymentProviderDisabled => "Payment provider disabled",
            Self::PaymentVerifyFailed => "Payment notify verification failed",

            // Wallet
            Self::InsufficientBalance => "Insufficient balance",
            Self::WalletOrderNotFound => "Wallet order not found",

            // Instance
            Self::VpsNotFound => "VPS instance not found",
            Self::AutomationFailed => "Automation call failed",
            Self::AutomationTimeout => "Automation call timed out",

            // System
            Self::InternalError => "Internal server error",
            Self::DatabaseError => "Database error",
            Self::NetworkError => "Network error",
            Self::TimeoutError => "Operation timed out",
            Self::ConfigError => "Configuration error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

/// Error returned when converting an unknown u16 into an [`ErrorCode`]
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

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1003 => Ok(ErrorCode::TokenExpired),
            1004 => Ok(ErrorCode::TokenInvalid),
            1008 => Ok(ErrorCode::CaptchaFailed),

            // Permission
            2001 => Ok(ErrorCode::PermissionDenied),
            2003 => Ok(ErrorCode::AdminRequired),
            2101 => Ok(ErrorCode::RealNameRequired),

            // Order
            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::OrderItemNotFound),
            4010 => Ok(ErrorCode::NoPaymentRequired),
            4101 => Ok(ErrorCode::ResizeSamePlan),
            4102 => Ok(ErrorCode::ResizeDisabled),
            4103 => Ok(ErrorCode::ResizeInProgress),
            4201 => Ok(ErrorCode::Provisioning),

            // Payment
            5001 => Ok(ErrorCode::PaymentNotFound),
            5002 => Ok(ErrorCode::PaymentProviderNotFound),
            5003 => Ok(ErrorCode::PaymentProviderDisabled),
            5004 => Ok(ErrorCode::PaymentVerifyFailed),

            // Wallet
            6001 => Ok(ErrorCode::InsufficientBalance),
            6002 => Ok(ErrorCode::WalletOrderNotFound),

            // Instance
            7001 => Ok(ErrorCode::VpsNotFound),
            7101 => Ok(ErrorCode::AutomationFailed),
            7102 => Ok(ErrorCode::AutomationTimeout),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::NotFound.code(), 3);
        assert_eq!(ErrorCode::Conflict.code(), 4);
        assert_eq!(ErrorCode::NotAuthenticated.code(), 1001);
        assert_eq!(ErrorCode::RealNameRequired.code(), 2101);
        assert_eq!(ErrorCode::NoPaymentRequired.code(), 4010);
        assert_eq!(ErrorCode::ResizeInProgress.code(), 4103);
        assert_eq!(ErrorCode::InsufficientBalance.code(), 6001);
        assert_eq!(ErrorCode::AutomationFailed.code(), 7101);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_is_success() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::Conflict.is_success());
    }

    #[test]
    fn test_try_from_valid() {
        assert_eq!(ErrorCode::try_from(0), Ok(ErrorCode::Success));
        assert_eq!(ErrorCode::try_from(4101), Ok(ErrorCode::ResizeSamePlan));
        assert_eq!(ErrorCode::try_from(6001), Ok(ErrorCode::InsufficientBalance));
        assert_eq!(ErrorCode::try_from(9005), Ok(ErrorCode::ConfigError));
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(999), Err(InvalidErrorCode(999)));
        assert_eq!(ErrorCode::try_from(3001), Err(InvalidErrorCode(3001)));
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&ErrorCode::InsufficientBalance).unwrap();
        assert_eq!(json, "6001");
        let code: ErrorCode = serde_json::from_str("4103").unwrap();
        assert_eq!(code, ErrorCode::ResizeInProgress);
        assert!(serde_json::from_str::<ErrorCode>("4999").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::NotFound.to_string(), "E0003");
        assert_eq!(ErrorCode::ResizeDisabled.to_string(), "E4102");
    }

    #[test]
    fn test_message() {
        assert_eq!(ErrorCode::InsufficientBalance.message(), "Insufficient balance");
        assert_eq!(ErrorCode::RealNameRequired.message(), "Real-name verification required");
    }
}
