//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;
use workflow_billing::BillingUser;
use workflow_billing_shared::AppRole;

use super::jwt::JwtError;
use crate::state::AppState;

/// Authenticated user information extracted from the access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

impl AuthUser {
    /// Billing needs an email to find or create the customer
    pub fn billing_user(&self) -> Result<BillingUser, AuthError> {
        let email = self
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or(AuthError::MissingEmail)?;
        Ok(BillingUser::new(self.user_id, email))
    }
}

/// Extract bearer token from the Authorization header
fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware that requires a valid access token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => state
            .jwt
            .verify(token)
            .map(|claims| AuthUser {
                user_id: claims.sub,
                email: claims.email,
            })
            .map_err(AuthError::from),
        None => {
            if request.headers().contains_key(AUTHORIZATION) {
                Err(AuthError::InvalidAuthFormat)
            } else {
                Err(AuthError::MissingAuth)
            }
        }
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(path = %path, user_id = %auth_user.user_id, "require_auth: authenticated");
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that requires the `superadmin` role; layer it inside `require_auth`
pub async fn require_superadmin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth_user) = request.extensions().get::<AuthUser>().cloned() else {
        return AuthError::MissingAuth.into_response();
    };

    match state
        .directory
        .has_role(auth_user.user_id, AppRole::Superadmin)
        .await
    {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            tracing::warn!(user_id = %auth_user.user_id, "require_superadmin: role missing");
            AuthError::InsufficientPermissions.into_response()
        }
        Err(e) => {
            tracing::error!(user_id = %auth_user.user_id, error = %e, "require_superadmin: role lookup failed");
            AuthError::Internal(e.to_string()).into_response()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid authentication format")]
    InvalidAuthFormat,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("User not authenticated or email not available")]
    MissingEmail,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JwtError> for AuthError {
    fn from(_: JwtError) -> Self {
        AuthError::InvalidToken
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidAuthFormat => {
                (StatusCode::UNAUTHORIZED, "Invalid authentication format")
            }
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::MissingEmail => (
                StatusCode::UNAUTHORIZED,
                "User not authenticated or email not available",
            ),
            AuthError::InsufficientPermissions => (StatusCode::FORBIDDEN, "Forbidden"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
