//! Per-request ticket check for protected routes.
//!
//! Routes are classified by their matched route template against an explicit
//! allow-list of public routes. Anything not on the list, including requests
//! that matched no route at all, is protected.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, sync::Arc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    error::AuthError,
    session::{SessionBinder, TicketCheck, SESSION_COOKIE_NAME, TICKET_COOKIE_NAME},
    state::AuthState,
    utils::{extract_cookie, hash_token},
};

/// Route templates reachable without a session.
pub const PUBLIC_ROUTES: &[&str] = &["/", "/health", "/v1/auth/login", "/api-docs/openapi.json"];

/// Swagger UI serves a tree of static assets under this route.
const PUBLIC_ROUTE_TREE: &str = "/swagger-ui";

/// Whether a matched route template is public.
#[must_use]
pub fn is_public_route(route: Option<&str>) -> bool {
    route.is_some_and(|route| {
        PUBLIC_ROUTES.contains(&route)
            || route == PUBLIC_ROUTE_TREE
            || route.starts_with("/swagger-ui/")
    })
}

/// The signed-in user, attached to the request for protected handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: String,
    /// Digest of the validated ticket; logout clears only this value.
    pub ticket_digest: String,
    pub ticket_issued_at: DateTime<Utc>,
    pub ticket_expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No session was presented.
    Unauthenticated,
    /// Session or ticket missing, idle or past its lifetime.
    Expired,
    /// All ticket locations present but disagreeing.
    HijackSuspected,
}

impl DenyReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Expired => "expired",
            Self::HijackSuspected => "hijack_suspected",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Unauthenticated => "Sign in required.",
            Self::Expired => "Your session has expired. Please sign in again.",
            Self::HijackSuspected => {
                "Your session was ended for security reasons. Please sign in again."
            }
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TicketCheck> for DenyReason {
    fn from(check: TicketCheck) -> Self {
        match check {
            TicketCheck::Mismatch => Self::HijackSuspected,
            TicketCheck::Valid | TicketCheck::Missing => Self::Expired,
        }
    }
}

#[derive(Debug)]
pub enum GuardDecision {
    Allow(AuthenticatedUser),
    Deny {
        reason: DenyReason,
        /// Cookie deletions to send back.
        cookies: Vec<HeaderValue>,
    },
}

/// Check the ticket triple for one request and revoke on failure.
///
/// # Errors
/// Returns an [`AuthError`] when a collaborator fails; callers must deny.
pub async fn guard_request(state: &AuthState, headers: &HeaderMap) -> Result<GuardDecision, AuthError> {
    let session_id = extract_cookie(headers, SESSION_COOKIE_NAME);
    let ticket_cookie = extract_cookie(headers, TICKET_COOKIE_NAME);

    if session_id.is_none() && ticket_cookie.is_none() {
        return Ok(GuardDecision::Deny {
            reason: DenyReason::Unauthenticated,
            cookies: Vec::new(),
        });
    }

    let sessions = state.sessions();
    let directory = state.directory();

    let session = match &session_id {
        Some(session_id) => sessions
            .store()
            .load(session_id)
            .await
            .map_err(AuthError::SessionStore)?,
        None => None,
    };

    let Some(session) = session else {
        debug!("no live server session for presented cookies");
        let cookies = sessions
            .revoke_presented(directory, session_id.as_deref(), None, &[])
            .await?;
        return Ok(GuardDecision::Deny {
            reason: DenyReason::Expired,
            cookies,
        });
    };

    let identity = directory
        .find_by_id(session.user_id)
        .await
        .map_err(AuthError::Directory)?;

    let now = Utc::now();
    let check = SessionBinder::validate(
        session.live_digest(now),
        ticket_cookie.as_deref(),
        identity
            .as_ref()
            .and_then(|identity| identity.active_session_token.as_deref()),
    );

    if let (TicketCheck::Valid, Some(identity)) = (check, identity) {
        return Ok(GuardDecision::Allow(AuthenticatedUser {
            user_id: identity.id,
            email: identity.email,
            session_id: session_id.unwrap_or_default(),
            ticket_digest: session.ticket_digest,
            ticket_issued_at: session.issued_at,
            ticket_expires_at: session.ticket_expires_at,
        }));
    }

    let reason = DenyReason::from(check);
    warn!(user_id = %session.user_id, reason = %reason, "session ticket rejected");

    let cookie_digest = ticket_cookie.as_deref().map(hash_token);
    let mut presented = vec![session.ticket_digest.as_str()];
    if let Some(cookie_digest) = cookie_digest.as_deref() {
        if cookie_digest != session.ticket_digest {
            presented.push(cookie_digest);
        }
    }
    let cookies = sessions
        .revoke_presented(
            directory,
            session_id.as_deref(),
            Some(session.user_id),
            &presented,
        )
        .await?;

    Ok(GuardDecision::Deny { reason, cookies })
}

#[derive(Serialize)]
struct DenyBody {
    reason: DenyReason,
    message: &'static str,
}

fn deny_response(reason: DenyReason, cookies: Vec<HeaderValue>) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(DenyBody {
            reason,
            message: reason.message(),
        }),
    )
        .into_response();
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

/// Axum middleware guarding every route not on the public allow-list.
pub async fn require_session(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());
    if is_public_route(route.as_deref()) {
        return next.run(request).await;
    }

    match guard_request(&state, request.headers()).await {
        Ok(GuardDecision::Allow(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(GuardDecision::Deny { reason, cookies }) => deny_response(reason, cookies),
        Err(err) => {
            error!(kind = err.kind(), "Request guard failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
