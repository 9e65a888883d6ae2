//! Failures that abort a login, logout or guarded request.
//!
//! Policy rejections (bad captcha, wrong password, lockout) are not errors; they
//! are [`LoginOutcome`](super::login::LoginOutcome) variants. Everything here
//! means a collaborator misbehaved and the request must fail closed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user directory unavailable: {0}")]
    Directory(#[source] anyhow::Error),

    #[error("audit sink unavailable: {0}")]
    AuditSink(#[source] anyhow::Error),

    #[error("session store unavailable: {0}")]
    SessionStore(#[source] anyhow::Error),

    #[error("failed to generate session token: {0}")]
    TokenGeneration(#[source] rand::Error),

    #[error("{0} does not fit the clock")]
    ClockOverflow(&'static str),

    #[error("invalid cookie header: {0}")]
    InvalidHeader(#[from] axum::http::header::InvalidHeaderValue),
}

impl AuthError {
    /// Short label used in logs and metrics attributes.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::AuditSink(_) => "audit_sink",
            Self::SessionStore(_) => "session_store",
            Self::TokenGeneration(_) => "token_generation",
            Self::ClockOverflow(_) => "clock_overflow",
            Self::InvalidHeader(_) => "invalid_header",
        }
    }
}
