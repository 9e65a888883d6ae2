//! Session tickets bound to three locations.
//!
//! A ticket is one random value. The browser holds it in an `HttpOnly` cookie;
//! the server-side session and the identity row hold its SHA-256 digest. A
//! request is only trusted when all three are present and the cookie hashes to
//! the two stored digests. Issuing a ticket overwrites the identity's persisted
//! digest, so any older ticket for the same identity stops validating.
//!
//! The server-side session also carries the signed-in user id and is addressed
//! by its own random session id cookie. Login always mints a fresh session id,
//! so a session id planted before login is never promoted.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::http::HeaderValue;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration as StdDuration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use super::{
    directory::{db_span, Identity, UserDirectory},
    error::AuthError,
    utils::{generate_token, hash_token, is_unique_violation},
};

pub const SESSION_COOKIE_NAME: &str = "warden_sid";
pub const TICKET_COOKIE_NAME: &str = "warden_ticket";

/// Server-side half of a signed-in session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSession {
    pub user_id: Uuid,
    /// Digest of the ticket cookie, see [`hash_token`].
    pub ticket_digest: String,
    pub issued_at: DateTime<Utc>,
    pub ticket_expires_at: DateTime<Utc>,
}

impl ServerSession {
    /// Ticket digest, or `None` once the ticket's absolute lifetime has passed.
    #[must_use]
    pub fn live_digest(&self, now: DateTime<Utc>) -> Option<&str> {
        (now < self.ticket_expires_at).then_some(self.ticket_digest.as_str())
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session and return its id.
    async fn create(&self, session: ServerSession) -> Result<String>;

    /// Load a session, refreshing its idle timer.
    async fn load(&self, session_id: &str) -> Result<Option<ServerSession>>;

    async fn destroy(&self, session_id: &str) -> Result<()>;
}

/// Which [`SessionStore`] the server runs with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionBackend {
    #[default]
    Postgres,
    /// Process-local; sessions are lost on restart and not shared between replicas.
    Memory,
}

impl SessionBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown session store: {other}")),
        }
    }
}

struct StoredSession {
    session: ServerSession,
    last_seen: Instant,
}

/// In-process session store with a sliding idle timeout.
pub struct MemorySessionStore {
    idle_timeout: StdDuration,
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(idle_timeout: StdDuration) -> Self {
        Self {
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: ServerSession) -> Result<String> {
        let session_id = generate_token()?;
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.last_seen.elapsed() < self.idle_timeout);
        sessions.insert(
            hash_token(&session_id),
            StoredSession {
                session,
                last_seen: Instant::now(),
            },
        );
        Ok(session_id)
    }

    async fn load(&self, session_id: &str) -> Result<Option<ServerSession>> {
        let key = hash_token(session_id);
        let mut sessions = self.sessions.lock().await;
        let expired = match sessions.get_mut(&key) {
            Some(entry) if entry.last_seen.elapsed() < self.idle_timeout => {
                entry.last_seen = Instant::now();
                return Ok(Some(entry.session.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            sessions.remove(&key);
            debug!("server session expired after idle timeout");
        }
        Ok(None)
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        self.sessions.lock().await.remove(&hash_token(session_id));
        Ok(())
    }
}

/// Postgres store over the `user_sessions` table (see `sql/schema.sql`).
///
/// Rows are keyed by the digest of the session id; the raw id only exists in
/// the session cookie.
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
    idle_seconds: i64,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool, idle_timeout: StdDuration) -> Self {
        Self {
            pool,
            idle_seconds: i64::try_from(idle_timeout.as_secs()).unwrap_or(i64::MAX),
        }
    }

    async fn prune(&self) -> Result<()> {
        let query = r"
            DELETE FROM user_sessions
            WHERE last_seen_at <= NOW() - ($1 * INTERVAL '1 second')
        ";
        sqlx::query(query)
            .bind(self.idle_seconds)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to prune idle sessions")?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: ServerSession) -> Result<String> {
        self.prune().await?;

        let query = r"
            INSERT INTO user_sessions
                (session_hash, user_id, ticket_digest, issued_at, ticket_expires_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
        ";
        for _ in 0..3 {
            let session_id = generate_token()?;
            let result = sqlx::query(query)
                .bind(hash_token(&session_id))
                .bind(session.user_id)
                .bind(&session.ticket_digest)
                .bind(session.issued_at)
                .bind(session.ticket_expires_at)
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await;

            match result {
                Ok(_) => return Ok(session_id),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to insert session"),
            }
        }

        Err(anyhow!("failed to generate unique session id"))
    }

    async fn load(&self, session_id: &str) -> Result<Option<ServerSession>> {
        // Sliding idle timeout: a live row is touched in the same statement.
        let query = r"
            UPDATE user_sessions
            SET last_seen_at = NOW()
            WHERE session_hash = $1
              AND last_seen_at > NOW() - ($2 * INTERVAL '1 second')
            RETURNING user_id, ticket_digest, issued_at, ticket_expires_at
        ";
        let row = sqlx::query(query)
            .bind(hash_token(session_id))
            .bind(self.idle_seconds)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to load session")?;

        Ok(row.map(|row| ServerSession {
            user_id: row.get("user_id"),
            ticket_digest: row.get("ticket_digest"),
            issued_at: row.get("issued_at"),
            ticket_expires_at: row.get("ticket_expires_at"),
        }))
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        let query = "DELETE FROM user_sessions WHERE session_hash = $1";
        sqlx::query(query)
            .bind(hash_token(session_id))
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(())
    }
}

/// Outcome of comparing the three ticket locations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketCheck {
    Valid,
    /// At least one location holds no ticket.
    Missing,
    /// All locations hold a ticket but they disagree.
    Mismatch,
}

impl TicketCheck {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// The writes a ticket issuance consists of, computed before any of them happen.
#[derive(Clone)]
pub struct TicketPlan {
    user_id: Uuid,
    token: String,
    digest: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ticket_cookie: HeaderValue,
}

impl TicketPlan {
    fn server_session(&self) -> ServerSession {
        ServerSession {
            user_id: self.user_id,
            ticket_digest: self.digest.clone(),
            issued_at: self.issued_at,
            ticket_expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for TicketPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketPlan")
            .field("user_id", &self.user_id)
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A ticket that now exists in all three locations.
#[derive(Clone)]
pub struct IssuedSession {
    pub user_id: Uuid,
    pub session_id: String,
    pub ticket: String,
    pub expires_at: DateTime<Utc>,
    /// `Set-Cookie` values for the session id and the ticket.
    pub cookies: Vec<HeaderValue>,
}

impl fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedSession")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

pub struct SessionBinder {
    store: Arc<dyn SessionStore>,
    ticket_ttl: Duration,
}

impl SessionBinder {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, ticket_ttl: Duration) -> Self {
        Self { store, ticket_ttl }
    }

    #[must_use]
    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Draw a fresh ticket for `identity` and describe where it must be written.
    ///
    /// # Errors
    /// Returns an error if the RNG fails, the lifetime overflows the clock or
    /// the cookie cannot be encoded.
    pub fn plan(&self, identity: &Identity, now: DateTime<Utc>) -> Result<TicketPlan, AuthError> {
        let expires_at = now
            .checked_add_signed(self.ticket_ttl)
            .ok_or(AuthError::ClockOverflow("ticket lifetime"))?;
        let token = generate_token()?;
        let ticket_cookie = ticket_cookie(&token, self.ticket_ttl.num_seconds())?;
        Ok(TicketPlan {
            user_id: identity.id,
            digest: hash_token(&token),
            token,
            issued_at: now,
            expires_at,
            ticket_cookie,
        })
    }

    /// Write a new ticket to the identity row, then the server session.
    ///
    /// If the server session cannot be created the persisted value is rolled
    /// back, so the ticket never ends up valid in only some locations. Any
    /// `previous_session_id` presented by the client is destroyed afterwards.
    ///
    /// # Errors
    /// Returns an error if a collaborator write fails.
    pub async fn issue(
        &self,
        directory: &dyn UserDirectory,
        identity: &Identity,
        previous_session_id: Option<&str>,
    ) -> Result<IssuedSession, AuthError> {
        let plan = self.plan(identity, Utc::now())?;
        self.apply(directory, plan, previous_session_id).await
    }

    /// Perform the writes described by `plan`.
    ///
    /// # Errors
    /// Returns an error if a collaborator write fails.
    pub async fn apply(
        &self,
        directory: &dyn UserDirectory,
        plan: TicketPlan,
        previous_session_id: Option<&str>,
    ) -> Result<IssuedSession, AuthError> {
        directory
            .set_active_token(plan.user_id, Some(&plan.digest))
            .await
            .map_err(AuthError::Directory)?;

        let session_id = match self.store.create(plan.server_session()).await {
            Ok(session_id) => session_id,
            Err(err) => {
                self.rollback_persisted(directory, &plan).await;
                return Err(AuthError::SessionStore(err));
            }
        };

        let session_cookie = match session_cookie(&session_id) {
            Ok(cookie) => cookie,
            Err(err) => {
                if let Err(destroy_err) = self.store.destroy(&session_id).await {
                    error!("Failed to destroy session during rollback: {destroy_err:#}");
                }
                self.rollback_persisted(directory, &plan).await;
                return Err(err);
            }
        };

        if let Some(previous) = previous_session_id.filter(|previous| *previous != session_id) {
            if let Err(err) = self.store.destroy(previous).await {
                // The old id no longer maps to the live ticket, so it cannot authenticate.
                error!("Failed to destroy previous session: {err:#}");
            }
        }

        info!(user_id = %plan.user_id, expires_at = %plan.expires_at, "session ticket issued");

        Ok(IssuedSession {
            user_id: plan.user_id,
            session_id,
            ticket: plan.token,
            expires_at: plan.expires_at,
            cookies: vec![session_cookie, plan.ticket_cookie],
        })
    }

    async fn rollback_persisted(&self, directory: &dyn UserDirectory, plan: &TicketPlan) {
        match directory.revoke_active_token(plan.user_id, &plan.digest).await {
            Ok(_) => debug!(user_id = %plan.user_id, "persisted ticket rolled back"),
            Err(err) => error!(
                user_id = %plan.user_id,
                "Failed to roll back persisted ticket: {err:#}"
            ),
        }
    }

    /// Compare the three ticket locations.
    ///
    /// `server` and `persisted` are digests; `cookie` is the raw ticket.
    #[must_use]
    pub fn validate(server: Option<&str>, cookie: Option<&str>, persisted: Option<&str>) -> TicketCheck {
        match (server, cookie, persisted) {
            (Some(server), Some(cookie), Some(persisted)) => {
                if hash_token(cookie) == server && server == persisted {
                    TicketCheck::Valid
                } else {
                    TicketCheck::Mismatch
                }
            }
            _ => TicketCheck::Missing,
        }
    }

    /// End a validated session on logout.
    ///
    /// The persisted digest is compare-and-cleared against the session's own
    /// digest, so a login that landed after the guard check keeps its ticket.
    /// Returns whether the persisted digest was cleared, plus cookie deletions.
    ///
    /// # Errors
    /// Returns an error if a collaborator write fails.
    pub async fn revoke(
        &self,
        directory: &dyn UserDirectory,
        session_id: Option<&str>,
        user_id: Uuid,
        ticket_digest: &str,
    ) -> Result<(bool, Vec<HeaderValue>), AuthError> {
        let cleared = directory
            .revoke_active_token(user_id, ticket_digest)
            .await
            .map_err(AuthError::Directory)?;
        self.end_server_session(session_id).await?;
        Ok((cleared, clear_cookies()?))
    }

    /// Revoke after a failed validation.
    ///
    /// The persisted digest is only cleared if it equals one of the `digests`
    /// the request carried: a burned ticket is destroyed, but a stale session
    /// cannot wipe out the ticket of a newer login.
    ///
    /// # Errors
    /// Returns an error if a collaborator write fails.
    pub async fn revoke_presented(
        &self,
        directory: &dyn UserDirectory,
        session_id: Option<&str>,
        user_id: Option<Uuid>,
        digests: &[&str],
    ) -> Result<Vec<HeaderValue>, AuthError> {
        if let Some(user_id) = user_id {
            for candidate in digests {
                let cleared = directory
                    .revoke_active_token(user_id, candidate)
                    .await
                    .map_err(AuthError::Directory)?;
                if cleared {
                    info!(%user_id, "persisted ticket revoked");
                    break;
                }
            }
        }
        self.end_server_session(session_id).await?;
        clear_cookies()
    }

    async fn end_server_session(&self, session_id: Option<&str>) -> Result<(), AuthError> {
        if let Some(session_id) = session_id {
            self.store
                .destroy(session_id)
                .await
                .map_err(AuthError::SessionStore)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBinder")
            .field("ticket_ttl", &self.ticket_ttl)
            .finish_non_exhaustive()
    }
}

const COOKIE_ATTRIBUTES: &str = "Path=/; HttpOnly; Secure; SameSite=Strict";

/// Ticket cookie with a short absolute lifetime.
fn ticket_cookie(token: &str, max_age_seconds: i64) -> Result<HeaderValue, AuthError> {
    Ok(HeaderValue::from_str(&format!(
        "{TICKET_COOKIE_NAME}={token}; {COOKIE_ATTRIBUTES}; Max-Age={max_age_seconds}"
    ))?)
}

/// Session id cookie; lives as long as the browser session.
fn session_cookie(session_id: &str) -> Result<HeaderValue, AuthError> {
    Ok(HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={session_id}; {COOKIE_ATTRIBUTES}"
    ))?)
}

/// `Set-Cookie` values that delete both cookies.
pub(crate) fn clear_cookies() -> Result<Vec<HeaderValue>, AuthError> {
    [SESSION_COOKIE_NAME, TICKET_COOKIE_NAME]
        .iter()
        .map(|name| {
            HeaderValue::from_str(&format!("{name}=; {COOKIE_ATTRIBUTES}; Max-Age=0"))
                .map_err(AuthError::from)
        })
        .collect()
}
