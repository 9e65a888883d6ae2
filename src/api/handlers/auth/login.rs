use crate::auth::{
    extract_client_ip, extract_cookie, login::login as run_login, normalize_email,
    session::SESSION_COOKIE_NAME, valid_email, AuthState, LoginAttempt, LoginOutcome,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use super::cookie_headers;

/// Shown for both wrong credentials and lockout.
pub const GENERIC_LOGIN_FAILURE: &str = "Invalid email or password";

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 204, description = "Login success; session cookies are set"),
        (status = 400, description = "Validation error or captcha rejected", body = String),
        (status = 401, description = "Invalid email or password", body = String),
        (status = 500, description = "Login failed", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }
    if request.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing password".to_string()).into_response();
    }

    info!(
        client_ip = extract_client_ip(&headers).as_deref().unwrap_or("unknown"),
        "login attempt"
    );

    let attempt = LoginAttempt {
        email,
        password: SecretString::from(request.password),
        captcha_token: request.captcha_token,
        presented_session_id: extract_cookie(&headers, SESSION_COOKIE_NAME),
    };

    let outcome = run_login(&auth_state, attempt).await;
    if let Ok(outcome) = &outcome {
        info!(outcome = outcome.label(), "login finished");
    }

    match outcome {
        Ok(LoginOutcome::Success(issued)) => {
            (StatusCode::NO_CONTENT, cookie_headers(issued.cookies)).into_response()
        }
        Ok(LoginOutcome::InvalidCredentials | LoginOutcome::LockedOut) => {
            (StatusCode::UNAUTHORIZED, GENERIC_LOGIN_FAILURE.to_string()).into_response()
        }
        Ok(LoginOutcome::CaptchaRejected(rejection)) => {
            (StatusCode::BAD_REQUEST, rejection.public_message().to_string()).into_response()
        }
        Err(err) => {
            error!(kind = err.kind(), "Login failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
        }
    }
}
