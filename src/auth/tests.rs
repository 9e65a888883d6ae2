//! Auth module tests.
//!
//! The fakes here are also used by the HTTP handler tests.

use super::{
    audit::{AuditAction, AuditRecord, AuditSink},
    bot_gate::{CaptchaConfig, CaptchaRejection},
    directory::{verify_password_hash, Identity, UserDirectory},
    error::AuthError,
    guard::{guard_request, AuthenticatedUser, DenyReason, GuardDecision},
    lockout::LockoutPolicy,
    login::{login, logout, LoginAttempt, LoginOutcome},
    session::{MemorySessionStore, SessionBinder, TicketCheck, SESSION_COOKIE_NAME, TICKET_COOKIE_NAME},
    state::{AuthConfig, AuthState, Environment},
    utils::hash_token,
};
use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHasher, Version,
};
use async_trait::async_trait;
use axum::{
    http::{header::COOKIE, HeaderMap, HeaderValue},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use secrecy::SecretString;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration as StdDuration,
};
use uuid::Uuid;

pub(crate) const PASSWORD: &str = "correct horse battery";

struct StoredUser {
    identity: Identity,
    password_hash: String,
}

/// In-memory directory; each method holds the lock for its whole update.
#[derive(Default)]
pub(crate) struct MemoryDirectory {
    users: Mutex<HashMap<Uuid, StoredUser>>,
    writes: AtomicUsize,
}

impl MemoryDirectory {
    /// Add a user with a cheap argon2 hash of `password`.
    pub(crate) fn insert(&self, email: &str, password: &str) -> Result<Identity> {
        let params = Params::new(1024, 1, 1, None).map_err(|err| anyhow!("{err}"))?;
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("{err}"))?
            .to_string();
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            failed_attempt_count: 0,
            lockout_until: None,
            active_session_token: None,
        };
        self.lock()?.insert(
            identity.id,
            StoredUser {
                identity: identity.clone(),
                password_hash,
            },
        );
        Ok(identity)
    }

    pub(crate) fn get(&self, id: Uuid) -> Result<Identity> {
        self.lock()?
            .get(&id)
            .map(|user| user.identity.clone())
            .ok_or_else(|| anyhow!("unknown user {id}"))
    }

    /// Change a row directly, bypassing the write counter.
    pub(crate) fn edit(&self, id: Uuid, change: impl FnOnce(&mut Identity)) -> Result<()> {
        let mut users = self.lock()?;
        let user = users.get_mut(&id).ok_or_else(|| anyhow!("unknown user {id}"))?;
        change(&mut user.identity);
        Ok(())
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, StoredUser>>> {
        self.users.lock().map_err(|_| anyhow!("directory lock poisoned"))
    }

    fn update<T>(&self, id: Uuid, change: impl FnOnce(&mut Identity) -> T) -> Result<T> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut users = self.lock()?;
        let user = users.get_mut(&id).ok_or_else(|| anyhow!("unknown user {id}"))?;
        Ok(change(&mut user.identity))
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        Ok(self
            .lock()?
            .values()
            .find(|user| user.identity.email == email)
            .map(|user| user.identity.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.lock()?.get(&id).map(|user| user.identity.clone()))
    }

    async fn verify_credential(&self, id: Uuid, password: &str) -> Result<bool> {
        let users = self.lock()?;
        Ok(users
            .get(&id)
            .is_some_and(|user| verify_password_hash(password, &user.password_hash)))
    }

    async fn increment_failed_attempts(&self, id: Uuid) -> Result<u32> {
        self.update(id, |identity| {
            identity.failed_attempt_count += 1;
            identity.failed_attempt_count
        })
    }

    async fn reset_failed_attempts(&self, id: Uuid) -> Result<()> {
        self.update(id, |identity| identity.failed_attempt_count = 0)
    }

    async fn set_lockout(&self, id: Uuid, until: Option<DateTime<Utc>>) -> Result<()> {
        self.update(id, |identity| identity.lockout_until = until)
    }

    async fn set_active_token(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        self.update(id, |identity| {
            identity.active_session_token = token.map(str::to_string);
        })
    }

    /// Counts a write only when a row actually changes.
    async fn revoke_active_token(&self, id: Uuid, expected: &str) -> Result<bool> {
        let mut users = self.lock()?;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        if user.identity.active_session_token.as_deref() != Some(expected) {
            return Ok(false);
        }
        user.identity.active_session_token = None;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[derive(Default)]
pub(crate) struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub(crate) fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub(crate) fn actions(&self) -> Vec<AuditAction> {
        self.records().iter().map(|record| record.action).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("audit lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

struct OfflineAuditSink;

#[async_trait]
impl AuditSink for OfflineAuditSink {
    async fn append(&self, _record: &AuditRecord) -> Result<()> {
        Err(anyhow!("audit sink offline"))
    }
}

pub(crate) struct Harness {
    pub(crate) state: Arc<AuthState>,
    pub(crate) directory: Arc<MemoryDirectory>,
    pub(crate) audit: Arc<MemoryAuditSink>,
}

/// Auth state for a development deployment with the captcha bypassed.
pub(crate) fn harness() -> Result<Harness> {
    let captcha = CaptchaConfig::new().with_bypass(true);
    harness_with(captcha, Environment::Development)
}

pub(crate) fn harness_with(captcha: CaptchaConfig, environment: Environment) -> Result<Harness> {
    let directory = Arc::new(MemoryDirectory::default());
    let audit = Arc::new(MemoryAuditSink::default());
    let config = AuthConfig::new("https://warden.test".to_string())
        .with_environment(environment)
        .with_captcha(captcha);
    let state = AuthState::new(
        config,
        directory.clone(),
        audit.clone(),
        Arc::new(MemorySessionStore::new(StdDuration::from_secs(60))),
    )?;
    Ok(Harness {
        state: Arc::new(state),
        directory,
        audit,
    })
}

pub(crate) fn attempt(email: &str, password: &str) -> LoginAttempt {
    LoginAttempt {
        email: email.to_string(),
        password: SecretString::from(password),
        captcha_token: Some("proof".to_string()),
        presented_session_id: None,
    }
}

/// Request headers carrying the given session id and ticket cookies.
pub(crate) fn cookie_headers(session_id: Option<&str>, ticket: Option<&str>) -> Result<HeaderMap> {
    let mut pairs = Vec::new();
    if let Some(session_id) = session_id {
        pairs.push(format!("{SESSION_COOKIE_NAME}={session_id}"));
    }
    if let Some(ticket) = ticket {
        pairs.push(format!("{TICKET_COOKIE_NAME}={ticket}"));
    }
    let mut headers = HeaderMap::new();
    if !pairs.is_empty() {
        headers.insert(COOKIE, HeaderValue::from_str(&pairs.join("; "))?);
    }
    Ok(headers)
}

/// Local stand-in for the verification service answering with a fixed score.
async fn spawn_verifier(score: f64) -> Result<String> {
    let app = Router::new().route(
        "/siteverify",
        post(move || async move {
            Json(serde_json::json!({
                "success": true,
                "score": score,
                "action": "login",
                "hostname": "warden.test",
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}/siteverify"))
}

async fn verified_harness(score: f64) -> Result<Harness> {
    let captcha = CaptchaConfig::new()
        .with_secret(Some(SecretString::from("test-secret")))
        .with_verify_url(spawn_verifier(score).await?)
        .with_timeout(StdDuration::from_secs(2));
    harness_with(captcha, Environment::Production)
}

fn expect_success(outcome: LoginOutcome) -> Result<super::session::IssuedSession> {
    match outcome {
        LoginOutcome::Success(issued) => Ok(issued),
        other => Err(anyhow!("expected success, got {}", other.label())),
    }
}

/// The user the guard attaches for `issued`'s cookies.
async fn signed_in_user(h: &Harness, issued: &super::session::IssuedSession) -> Result<AuthenticatedUser> {
    let headers = cookie_headers(Some(&issued.session_id), Some(&issued.ticket))?;
    match guard_request(&h.state, &headers).await? {
        GuardDecision::Allow(user) => Ok(user),
        GuardDecision::Deny { reason, .. } => Err(anyhow!("guard denied: {reason}")),
    }
}

#[tokio::test]
async fn fresh_identity_with_good_captcha_gets_ticket_in_three_places() -> Result<()> {
    let h = verified_harness(0.9).await?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;

    let issued = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, AuditAction::LoginSuccess);
    assert!(records[0].success);
    assert_eq!(records[0].user_id, Some(alice.id));

    let persisted = h.directory.get(alice.id)?.active_session_token;
    // Only digests are stored; the raw ticket lives in the cookie.
    assert_eq!(persisted, Some(hash_token(&issued.ticket)));

    let server = h
        .state
        .sessions()
        .store()
        .load(&issued.session_id)
        .await?
        .context("server session missing")?;
    assert_eq!(server.ticket_digest, hash_token(&issued.ticket));
    assert_eq!(server.user_id, alice.id);

    let ticket_cookie = issued
        .cookies
        .iter()
        .filter_map(|cookie| cookie.to_str().ok())
        .find(|cookie| cookie.starts_with("warden_ticket="))
        .context("ticket cookie missing")?;
    assert!(ticket_cookie.starts_with(&format!("warden_ticket={};", issued.ticket)));
    Ok(())
}

#[tokio::test]
async fn low_captcha_score_stops_before_identity_work() -> Result<()> {
    let h = verified_harness(0.1).await?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;

    let outcome = login(&h.state, attempt("alice@example.com", PASSWORD)).await?;
    assert!(matches!(
        outcome,
        LoginOutcome::CaptchaRejected(CaptchaRejection::ScoreTooLow { .. })
    ));
    assert!(h.audit.records().is_empty());
    assert_eq!(h.directory.writes(), 0);
    assert_eq!(h.directory.get(alice.id)?.active_session_token, None);
    Ok(())
}

#[tokio::test]
async fn missing_captcha_token_is_rejected() -> Result<()> {
    let h = verified_harness(0.9).await?;
    h.directory.insert("alice@example.com", PASSWORD)?;

    let mut request = attempt("alice@example.com", PASSWORD);
    request.captcha_token = None;
    let outcome = login(&h.state, request).await?;
    assert!(matches!(
        outcome,
        LoginOutcome::CaptchaRejected(CaptchaRejection::MissingToken)
    ));
    assert!(h.audit.records().is_empty());
    Ok(())
}

#[tokio::test]
async fn threshold_failures_lock_out_even_the_right_password() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;

    let first = login(&h.state, attempt("alice@example.com", "nope")).await?;
    let second = login(&h.state, attempt("alice@example.com", "nope")).await?;
    let third = login(&h.state, attempt("alice@example.com", "nope")).await?;
    assert!(matches!(first, LoginOutcome::InvalidCredentials));
    assert!(matches!(second, LoginOutcome::InvalidCredentials));
    assert!(matches!(third, LoginOutcome::LockedOut));

    let fourth = login(&h.state, attempt("alice@example.com", PASSWORD)).await?;
    assert!(matches!(fourth, LoginOutcome::LockedOut));

    assert_eq!(
        h.audit.actions(),
        vec![
            AuditAction::LoginFail,
            AuditAction::LoginFail,
            AuditAction::LockedOut,
            AuditAction::LockedOut,
        ]
    );
    let stored = h.directory.get(alice.id)?;
    assert!(stored.lockout_until.is_some());
    assert_eq!(stored.active_session_token, None);
    Ok(())
}

#[tokio::test]
async fn third_strike_after_two_prior_failures_locks() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;
    h.directory.edit(alice.id, |identity| identity.failed_attempt_count = 2)?;

    let outcome = login(&h.state, attempt("alice@example.com", "wrong")).await?;
    assert!(matches!(outcome, LoginOutcome::LockedOut));
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, AuditAction::LockedOut);
    assert!(!records[0].success);

    tokio::time::sleep(StdDuration::from_secs(1)).await;
    let outcome = login(&h.state, attempt("alice@example.com", PASSWORD)).await?;
    assert!(matches!(outcome, LoginOutcome::LockedOut));
    Ok(())
}

#[tokio::test]
async fn elapsed_lockout_allows_login_and_clears_state() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;
    h.directory.edit(alice.id, |identity| {
        identity.failed_attempt_count = 1;
        identity.lockout_until = Some(Utc::now() - Duration::seconds(1));
    })?;

    expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;

    let stored = h.directory.get(alice.id)?;
    assert_eq!(stored.failed_attempt_count, 0);
    assert_eq!(stored.lockout_until, None);
    Ok(())
}

#[tokio::test]
async fn unknown_email_is_audited_without_user() -> Result<()> {
    let h = harness()?;

    let outcome = login(&h.state, attempt(" Ghost@Example.com ", PASSWORD)).await?;
    assert!(matches!(outcome, LoginOutcome::InvalidCredentials));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].user_id, None);
    assert_eq!(records[0].email, "ghost@example.com");
    assert_eq!(records[0].action, AuditAction::LoginFail);
    Ok(())
}

#[tokio::test]
async fn every_gated_login_writes_exactly_one_matching_record() -> Result<()> {
    let h = harness()?;
    h.directory.insert("alice@example.com", PASSWORD)?;
    h.directory.insert("bob@example.com", PASSWORD)?;

    let attempts = [
        ("alice@example.com", "wrong"),
        ("nobody@example.com", PASSWORD),
        ("alice@example.com", PASSWORD),
        ("bob@example.com", "wrong"),
        ("bob@example.com", "wrong"),
        ("bob@example.com", "wrong"),
        ("bob@example.com", PASSWORD),
    ];
    for (email, password) in attempts {
        let before = h.audit.records().len();
        let outcome = login(&h.state, attempt(email, password)).await?;
        let records = h.audit.records();
        assert_eq!(records.len(), before + 1, "{email} produced a different record count");
        let record = records.last().context("record missing")?;
        assert_eq!(record.success, outcome.is_success());
    }
    Ok(())
}

#[tokio::test]
async fn new_ticket_invalidates_the_previous_one() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;

    let old = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;
    let new = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;
    assert_ne!(old.ticket, new.ticket);

    let persisted = h.directory.get(alice.id)?.active_session_token;
    assert_eq!(
        SessionBinder::validate(
            Some(&hash_token(&old.ticket)),
            Some(&old.ticket),
            persisted.as_deref()
        ),
        TicketCheck::Mismatch
    );

    let old_headers = cookie_headers(Some(&old.session_id), Some(&old.ticket))?;
    let decision = guard_request(&h.state, &old_headers).await?;
    assert!(matches!(
        decision,
        GuardDecision::Deny {
            reason: DenyReason::HijackSuspected,
            ..
        }
    ));

    // The stale session must not take the newer login down with it.
    let new_headers = cookie_headers(Some(&new.session_id), Some(&new.ticket))?;
    let decision = guard_request(&h.state, &new_headers).await?;
    assert!(matches!(decision, GuardDecision::Allow(user) if user.user_id == alice.id));
    Ok(())
}

#[tokio::test]
async fn guard_denies_every_missing_or_mismatched_component() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;

    // (send server session, send ticket cookie, keep persisted, forge cookie)
    let cases = [
        (false, false, true, false, DenyReason::Unauthenticated),
        (true, false, true, false, DenyReason::Expired),
        (false, true, true, false, DenyReason::Expired),
        (true, true, false, false, DenyReason::Expired),
        (true, false, false, false, DenyReason::Expired),
        (false, true, false, false, DenyReason::Expired),
        (true, true, true, true, DenyReason::HijackSuspected),
    ];

    for (send_session, send_cookie, keep_persisted, forge_cookie, expected) in cases {
        let issued = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;
        if !keep_persisted {
            h.directory
                .edit(alice.id, |identity| identity.active_session_token = None)?;
        }
        let cookie = if forge_cookie { "forged" } else { issued.ticket.as_str() };
        let headers = cookie_headers(
            send_session.then_some(issued.session_id.as_str()),
            send_cookie.then_some(cookie),
        )?;

        match guard_request(&h.state, &headers).await? {
            GuardDecision::Deny { reason, cookies } => {
                assert_eq!(reason, expected);
                if expected != DenyReason::Unauthenticated {
                    assert_eq!(cookies.len(), 2, "cookies must be cleared");
                }
            }
            GuardDecision::Allow(_) => {
                return Err(anyhow!(
                    "allowed session={send_session} cookie={send_cookie} persisted={keep_persisted}"
                ));
            }
        }
    }

    let issued = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;
    let headers = cookie_headers(Some(&issued.session_id), Some(&issued.ticket))?;
    assert!(matches!(
        guard_request(&h.state, &headers).await?,
        GuardDecision::Allow(_)
    ));
    Ok(())
}

#[tokio::test]
async fn hijack_detection_revokes_everywhere() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;
    let issued = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;

    let forged = cookie_headers(Some(&issued.session_id), Some("forged"))?;
    let decision = guard_request(&h.state, &forged).await?;
    assert!(matches!(
        decision,
        GuardDecision::Deny {
            reason: DenyReason::HijackSuspected,
            ..
        }
    ));

    assert_eq!(h.directory.get(alice.id)?.active_session_token, None);
    assert!(h
        .state
        .sessions()
        .store()
        .load(&issued.session_id)
        .await?
        .is_none());

    // The legitimate cookies are burned too.
    let genuine = cookie_headers(Some(&issued.session_id), Some(&issued.ticket))?;
    assert!(matches!(
        guard_request(&h.state, &genuine).await?,
        GuardDecision::Deny {
            reason: DenyReason::Expired,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn login_never_reuses_a_presented_session_id() -> Result<()> {
    let h = harness()?;
    h.directory.insert("alice@example.com", PASSWORD)?;
    let planted = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;

    let mut request = attempt("alice@example.com", PASSWORD);
    request.presented_session_id = Some(planted.session_id.clone());
    let fresh = expect_success(login(&h.state, request).await?)?;

    assert_ne!(fresh.session_id, planted.session_id);
    assert!(h
        .state
        .sessions()
        .store()
        .load(&planted.session_id)
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn logout_twice_is_idempotent() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;
    let issued = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;
    let user = signed_in_user(&h, &issued).await?;

    let first = logout(&h.state, &user).await?;
    assert!(first.revoked);
    assert_eq!(first.cookies.len(), 2);
    assert_eq!(h.directory.get(alice.id)?.active_session_token, None);
    assert_eq!(
        h.audit.actions(),
        vec![AuditAction::LoginSuccess, AuditAction::Logout]
    );

    let writes = h.directory.writes();
    let second = logout(&h.state, &user).await?;
    assert!(!second.revoked);
    assert_eq!(h.directory.writes(), writes);
    assert_eq!(h.audit.records().len(), 2);
    Ok(())
}

#[tokio::test]
async fn stale_logout_keeps_a_newer_login() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;

    let first = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;
    let first_user = signed_in_user(&h, &first).await?;
    // A second browser signs in after the first request passed the guard.
    let second = expect_success(login(&h.state, attempt("alice@example.com", PASSWORD)).await?)?;

    let outcome = logout(&h.state, &first_user).await?;
    assert!(!outcome.revoked);
    assert_eq!(outcome.cookies.len(), 2);
    assert_eq!(
        h.directory.get(alice.id)?.active_session_token,
        Some(hash_token(&second.ticket))
    );
    assert_eq!(
        h.audit.actions(),
        vec![AuditAction::LoginSuccess, AuditAction::LoginSuccess]
    );

    let user = signed_in_user(&h, &second).await?;
    assert_eq!(user.user_id, alice.id);
    Ok(())
}

#[tokio::test]
async fn success_resets_counters_written_after_the_snapshot() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;
    // Concurrent failures land after `alice` was read with a clean record.
    h.directory.edit(alice.id, |identity| {
        identity.failed_attempt_count = 2;
        identity.lockout_until = Some(Utc::now() - Duration::seconds(1));
    })?;

    h.state
        .lockout()
        .register_success(&*h.directory, &alice)
        .await?;

    let stored = h.directory.get(alice.id)?;
    assert_eq!(stored.failed_attempt_count, 0);
    assert_eq!(stored.lockout_until, None);
    Ok(())
}

#[tokio::test]
async fn lockout_window_past_the_clock_fails_before_counting() -> Result<()> {
    let h = harness()?;
    let alice = h.directory.insert("alice@example.com", PASSWORD)?;
    let policy = LockoutPolicy::new(1, Duration::MAX);

    let result = policy.register_failure(&*h.directory, &alice, Utc::now()).await;
    assert!(matches!(result, Err(AuthError::ClockOverflow(_))));
    assert_eq!(h.directory.writes(), 0);
    assert_eq!(h.directory.get(alice.id)?.failed_attempt_count, 0);
    Ok(())
}

#[tokio::test]
async fn audit_failure_fails_login_and_leaves_no_ticket() -> Result<()> {
    let directory = Arc::new(MemoryDirectory::default());
    let alice = directory.insert("alice@example.com", PASSWORD)?;
    let config = AuthConfig::new("https://warden.test".to_string())
        .with_environment(Environment::Development)
        .with_captcha(CaptchaConfig::new().with_bypass(true));
    let state = AuthState::new(
        config,
        directory.clone(),
        Arc::new(OfflineAuditSink),
        Arc::new(MemorySessionStore::new(StdDuration::from_secs(60))),
    )?;

    let result = login(&state, attempt("alice@example.com", PASSWORD)).await;
    assert!(matches!(result, Err(AuthError::AuditSink(_))));
    assert_eq!(directory.get(alice.id)?.active_session_token, None);

    let result = login(&state, attempt("alice@example.com", "wrong")).await;
    assert!(matches!(result, Err(AuthError::AuditSink(_))));
    Ok(())
}

#[test]
fn bypass_is_refused_in_production() {
    let result = harness_with(
        CaptchaConfig::new().with_bypass(true),
        Environment::Production,
    );
    assert!(result.is_err());
}
