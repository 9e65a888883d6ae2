use crate::auth::AuthenticatedUser;
use axum::{extract::Extension, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionStatus {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Ticket lifetime of the current session.", body = SessionStatus),
        (status = 401, description = "No valid session ticket."),
    ),
    tag = "auth"
)]
pub async fn session(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    let remaining = user.ticket_expires_at - Utc::now();
    Json(SessionStatus {
        issued_at: user.ticket_issued_at,
        expires_at: user.ticket_expires_at,
        expires_in_seconds: remaining.num_seconds().max(0),
    })
}
