//! JWT Extractor
//!
//! Validates the bearer token and yields [`CurrentUser`]; [`AdminUser`]
//! additionally requires the admin role or an admin permission.

use axum::{extract::FromRequestParts, http::request::Parts};
use shared::AppError;

use crate::auth::{CurrentUser, JwtError, JwtService};
use crate::core::ServerState;

impl FromRequestParts<ServerState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let auth_header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let token = match auth_header {
            Some(header) => JwtService::extract_from_header(header)
                .ok_or_else(|| AppError::invalid_token("Invalid authorization header"))?,
            None => {
                tracing::debug!(uri = %parts.uri, "Missing authorization header");
                return Err(AppError::not_authenticated());
            }
        };

        match state.jwt.validate_token(token) {
            Ok(claims) => {
                let user = CurrentUser::try_from(claims)
                    .map_err(|e| AppError::invalid_token(format!("Malformed JWT claims: {}", e)))?;
                parts.extensions.insert(user.clone());
                Ok(user)
            }
            Err(e) => {
                tracing::warn!(error = %e, uri = %parts.uri, "Token validation failed");
                match e {
                    JwtError::ExpiredToken => Err(AppError::token_expired()),
                    _ => Err(AppError::invalid_token("Invalid token")),
                }
            }
        }
    }
}

/// Authenticated admin (role `admin`, or any `orders:*` / `wallet:*` style grant
/// checked per handler with [`AdminUser::require`])
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

impl AdminUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    /// Require a specific permission on top of admin access
    pub fn require(&self, permission: &str) -> Result<(), AppError> {
        if self.0.has_permission(permission) {
            Ok(())
        } else {
            Err(AppError::permission_denied(format!(
                "Missing permission: {}",
                permission
            )))
        }
    }
}

impl FromRequestParts<ServerState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        let has_admin_grant = user.is_admin()
            || user
                .permissions
                .iter()
                .any(|p| p.starts_with("orders:") || p.starts_with("wallet:") || p.starts_with("settings:") || p == "all");
        if !has_admin_grant {
            tracing::warn!(user_id = user.id, uri = %parts.uri, "Admin route denied");
            return Err(AppError::new(shared::ErrorCode::AdminRequired));
        }
        Ok(Self(user))
    }
}
