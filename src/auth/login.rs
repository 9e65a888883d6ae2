//! Login pipeline and logout.
//!
//! A login attempt runs through fixed stages: captcha, identity resolution,
//! lockout check, credential check, ticket issuance. Every stage either hands
//! its result to the next one or stops with a final [`LoginOutcome`]. Stages
//! that stop after an identity lookup write exactly one audit record, always
//! after the directory writes for that outcome and before returning.

use axum::http::HeaderValue;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::{debug, error, info, warn};

use super::{
    audit::AuditAction,
    bot_gate::{CaptchaRejection, CaptchaVerdict},
    directory::Identity,
    error::AuthError,
    lockout::FailureOutcome,
    guard::AuthenticatedUser,
    session::IssuedSession,
    state::AuthState,
    utils::{hash_token, normalize_email},
};

/// One submitted login form.
pub struct LoginAttempt {
    pub email: String,
    pub password: SecretString,
    pub captcha_token: Option<String>,
    /// Session id cookie the client arrived with, if any. Never reused.
    pub presented_session_id: Option<String>,
}

impl fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("email", &self.email)
            .field("has_captcha_token", &self.captcha_token.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    Success(IssuedSession),
    InvalidCredentials,
    LockedOut,
    CaptchaRejected(CaptchaRejection),
}

impl LoginOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::InvalidCredentials => "invalid_credentials",
            Self::LockedOut => "locked_out",
            Self::CaptchaRejected(_) => "captcha_rejected",
        }
    }
}

/// Result of one pipeline stage.
#[derive(Debug)]
pub(crate) enum Step<T> {
    Proceed(T),
    Stop(LoginOutcome),
}

/// Run a login attempt to completion.
///
/// # Errors
/// Returns an [`AuthError`] when a collaborator fails; the attempt is then
/// aborted and nothing is returned to the caller as a success.
pub async fn login(state: &AuthState, attempt: LoginAttempt) -> Result<LoginOutcome, AuthError> {
    let email = normalize_email(&attempt.email);
    let now = Utc::now();

    if let Step::Stop(outcome) = captcha_stage(state, attempt.captcha_token.as_deref()).await {
        return Ok(outcome);
    }

    let identity = match resolve_stage(state, &email).await? {
        Step::Proceed(identity) => identity,
        Step::Stop(outcome) => return Ok(outcome),
    };

    let identity = match lockout_stage(state, identity, now).await? {
        Step::Proceed(identity) => identity,
        Step::Stop(outcome) => return Ok(outcome),
    };

    let identity = match credential_stage(state, identity, &attempt.password, now).await? {
        Step::Proceed(identity) => identity,
        Step::Stop(outcome) => return Ok(outcome),
    };

    issue_stage(state, &identity, attempt.presented_session_id.as_deref()).await
}

pub(crate) async fn captcha_stage(state: &AuthState, captcha_token: Option<&str>) -> Step<()> {
    let gate = state.bot_gate();
    let verdict = gate.verify(captcha_token, gate.config().expected_action()).await;
    debug!(accepted = verdict.is_accepted(), reason = %verdict.reason(), "captcha verdict");
    match verdict {
        CaptchaVerdict::Rejected(rejection) => {
            warn!(network = rejection.is_network(), "login rejected by captcha");
            Step::Stop(LoginOutcome::CaptchaRejected(rejection))
        }
        CaptchaVerdict::Accepted { .. } | CaptchaVerdict::Bypassed => Step::Proceed(()),
    }
}

/// Unknown emails are recorded with the attempted address and no user id.
pub(crate) async fn resolve_stage(
    state: &AuthState,
    email: &str,
) -> Result<Step<Identity>, AuthError> {
    let identity = state
        .directory()
        .find_by_email(email)
        .await
        .map_err(AuthError::Directory)?;

    match identity {
        Some(identity) => Ok(Step::Proceed(identity)),
        None => {
            info!("login attempt for unknown email");
            state.audit().record(AuditAction::LoginFail, None, email).await?;
            Ok(Step::Stop(LoginOutcome::InvalidCredentials))
        }
    }
}

pub(crate) async fn lockout_stage(
    state: &AuthState,
    identity: Identity,
    now: DateTime<Utc>,
) -> Result<Step<Identity>, AuthError> {
    if !state.lockout().is_locked(&identity, now) {
        return Ok(Step::Proceed(identity));
    }
    warn!(user_id = %identity.id, "login attempt while locked out");
    state
        .audit()
        .record(AuditAction::LockedOut, Some(identity.id), &identity.email)
        .await?;
    Ok(Step::Stop(LoginOutcome::LockedOut))
}

pub(crate) async fn credential_stage(
    state: &AuthState,
    identity: Identity,
    password: &SecretString,
    now: DateTime<Utc>,
) -> Result<Step<Identity>, AuthError> {
    let directory = state.directory();
    let matches = directory
        .verify_credential(identity.id, password.expose_secret())
        .await
        .map_err(AuthError::Directory)?;
    if matches {
        return Ok(Step::Proceed(identity));
    }

    let (action, outcome) = match state.lockout().register_failure(directory, &identity, now).await? {
        FailureOutcome::Counted(_) => (AuditAction::LoginFail, LoginOutcome::InvalidCredentials),
        FailureOutcome::LockedUntil(_) => (AuditAction::LockedOut, LoginOutcome::LockedOut),
    };
    state
        .audit()
        .record(action, Some(identity.id), &identity.email)
        .await?;
    Ok(Step::Stop(outcome))
}

pub(crate) async fn issue_stage(
    state: &AuthState,
    identity: &Identity,
    presented_session_id: Option<&str>,
) -> Result<LoginOutcome, AuthError> {
    let directory = state.directory();
    state.lockout().register_success(directory, identity).await?;

    let issued = state
        .sessions()
        .issue(directory, identity, presented_session_id)
        .await?;

    if let Err(err) = state
        .audit()
        .record(AuditAction::LoginSuccess, Some(identity.id), &identity.email)
        .await
    {
        // An unrecorded success must not leave a usable ticket behind.
        let digest = hash_token(&issued.ticket);
        if let Err(revoke_err) = state
            .sessions()
            .revoke_presented(
                directory,
                Some(&issued.session_id),
                Some(identity.id),
                &[digest.as_str()],
            )
            .await
        {
            error!(user_id = %identity.id, "Failed to revoke unaudited session: {revoke_err}");
        }
        return Err(err);
    }

    info!(user_id = %identity.id, "login succeeded");
    Ok(LoginOutcome::Success(issued))
}

/// What a logout did.
#[derive(Debug)]
pub struct LogoutOutcome {
    /// `true` if an active ticket was cleared and `LOGOUT` was recorded.
    pub revoked: bool,
    /// `Set-Cookie` deletions for the client.
    pub cookies: Vec<HeaderValue>,
}

/// Revoke the ticket `user` was validated with and end its server session.
///
/// Only that ticket is cleared: if a newer login already replaced it, the
/// newer ticket stays live and nothing is audited. Calling it again after a
/// successful logout finds no matching ticket and appends no audit record.
///
/// # Errors
/// Returns an [`AuthError`] when a collaborator fails.
pub async fn logout(state: &AuthState, user: &AuthenticatedUser) -> Result<LogoutOutcome, AuthError> {
    let (revoked, cookies) = state
        .sessions()
        .revoke(
            state.directory(),
            Some(&user.session_id),
            user.user_id,
            &user.ticket_digest,
        )
        .await?;

    if !revoked {
        info!(user_id = %user.user_id, "logout without an active ticket");
        return Ok(LogoutOutcome { revoked, cookies });
    }

    state
        .audit()
        .record(AuditAction::Logout, Some(user.user_id), &user.email)
        .await?;
    info!(user_id = %user.user_id, "logged out");

    Ok(LogoutOutcome { revoked, cookies })
}
