//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound
            | Self::OrderNotFound
            | Self::OrderItemNotFound
            | Self::PaymentNotFound
            | Self::PaymentProviderNotFound
            | Self::WalletOrderNotFound
            | Self::VpsNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::Conflict
            | Self::NoPaymentRequired
            | Self::InsufficientBalance
            | Self::ResizeSamePlan
            | Self::ResizeInProgress
            | Self::Provisioning => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden
            Self::PermissionDenied
            | Self::AdminRequired
            | Self::RealNameRequired
            | Self::ResizeDisabled
            | Self::PaymentProviderDisabled => StatusCode::FORBIDDEN,

            // 502/504 upstream automation
            Self::AutomationFailed => StatusCode::BAD_GATEWAY,
            Self::AutomationTimeout => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::NetworkError | Self::TimeoutError => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            Self::Unknown | Self::InternalError | Self::DatabaseError | Self::ConfigError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 400 Bad Request (validation, captcha, notify verification)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status() {
        assert_eq!(ErrorCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::OrderNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::VpsNotFound.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_conflict_status() {
        assert_eq!(ErrorCode::Conflict.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::NoPaymentRequired.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::InsufficientBalance.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::ResizeSamePlan.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::ResizeInProgress.http_status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_forbidden_status() {
        assert_eq!(ErrorCode::PermissionDenied.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::RealNameRequired.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::ResizeDisabled.http_status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_unauthorized_status() {
        assert_eq!(ErrorCode::NotAuthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::TokenInvalid.http_status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bad_request_status() {
        assert_eq!(ErrorCode::ValidationFailed.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::CaptchaFailed.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::PaymentVerifyFailed.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_error_status() {
        assert_eq!(
            ErrorCode::DatabaseError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorCode::AutomationFailed.http_status(), StatusCode::BAD_GATEWAY);
    }
}
