use crate::auth::AuthenticatedUser;
use axum::{extract::Extension, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Return the signed-in user.", body = MeResponse),
        (status = 401, description = "No valid session ticket."),
    ),
    tag = "me"
)]
pub async fn me(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(MeResponse {
        user_id: user.user_id,
        email: user.email,
    })
}
