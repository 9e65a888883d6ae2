use crate::auth::{login::logout as run_logout, AuthState, AuthenticatedUser};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::error;

use super::cookie_headers;

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Logged out; session cookies are cleared"),
        (status = 401, description = "No valid session ticket"),
        (status = 500, description = "Logout failed", body = String)
    ),
    tag = "auth"
)]
pub async fn logout(
    auth_state: Extension<Arc<AuthState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> impl IntoResponse {
    match run_logout(&auth_state, &user).await {
        Ok(outcome) => (StatusCode::NO_CONTENT, cookie_headers(outcome.cookies)).into_response(),
        Err(err) => {
            error!(kind = err.kind(), "Logout failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Logout failed".to_string()).into_response()
        }
    }
}
