//! User directory collaborator.
//!
//! The directory owns identity rows. Every method must be atomic for the row it
//! touches: the login pipeline does not lock anything itself, so concurrent
//! attempts against the same identity rely on the directory serializing its
//! read-modify-write updates (single-statement `UPDATE ... RETURNING` in
//! Postgres).

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Identity fields the login core reads and writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub failed_attempt_count: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub active_session_token: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>>;

    /// Check a password against the stored credential. Hashing is owned by the directory.
    async fn verify_credential(&self, id: Uuid, password: &str) -> Result<bool>;

    /// Increment the failed-attempt counter and return the new value.
    async fn increment_failed_attempts(&self, id: Uuid) -> Result<u32>;

    async fn reset_failed_attempts(&self, id: Uuid) -> Result<()>;

    async fn set_lockout(&self, id: Uuid, until: Option<DateTime<Utc>>) -> Result<()>;

    async fn set_active_token(&self, id: Uuid, token: Option<&str>) -> Result<()>;

    /// Clear the active token only if it still equals `expected`.
    ///
    /// Returns `true` when a token was cleared.
    async fn revoke_active_token(&self, id: Uuid, expected: &str) -> Result<bool>;
}

/// Verify a password against an argon2 PHC string.
pub(crate) fn verify_password_hash(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc).is_ok_and(|hash| {
        Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok()
    })
}

/// Postgres-backed directory over the `users` table (see `sql/schema.sql`).
#[derive(Clone, Debug)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const IDENTITY_COLUMNS: &str =
    "id, email, failed_attempt_count, lockout_until, active_session_token";

fn identity_from_row(row: &sqlx::postgres::PgRow) -> Identity {
    let count: i32 = row.get("failed_attempt_count");
    Identity {
        id: row.get("id"),
        email: row.get("email"),
        failed_attempt_count: u32::try_from(count).unwrap_or(0),
        lockout_until: row.get("lockout_until"),
        active_session_token: row.get("active_session_token"),
    }
}

pub(super) fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(identity_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(identity_from_row))
    }

    async fn verify_credential(&self, id: Uuid, password: &str) -> Result<bool> {
        let query = "SELECT password_hash FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load password hash")?;
        let Some(row) = row else {
            return Ok(false);
        };
        let phc: String = row.get("password_hash");
        let password = password.to_string();
        // argon2 is deliberately slow; keep it off the async workers.
        tokio::task::spawn_blocking(move || verify_password_hash(&password, &phc))
            .await
            .context("password verification task failed")
    }

    async fn increment_failed_attempts(&self, id: Uuid) -> Result<u32> {
        let query = r"
            UPDATE users
            SET failed_attempt_count = failed_attempt_count + 1
            WHERE id = $1
            RETURNING failed_attempt_count
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to increment failed attempts")?;
        let count: i32 = row.get("failed_attempt_count");
        Ok(u32::try_from(count).unwrap_or(0))
    }

    async fn reset_failed_attempts(&self, id: Uuid) -> Result<()> {
        let query = "UPDATE users SET failed_attempt_count = 0 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to reset failed attempts")?;
        Ok(())
    }

    async fn set_lockout(&self, id: Uuid, until: Option<DateTime<Utc>>) -> Result<()> {
        let query = "UPDATE users SET lockout_until = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(until)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to set lockout")?;
        Ok(())
    }

    async fn set_active_token(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        let query = "UPDATE users SET active_session_token = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(token)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to set active session token")?;
        if result.rows_affected() == 0 {
            anyhow::bail!("user {id} not found while setting active session token");
        }
        Ok(())
    }

    async fn revoke_active_token(&self, id: Uuid, expected: &str) -> Result<bool> {
        let query = r"
            UPDATE users
            SET active_session_token = NULL
            WHERE id = $1 AND active_session_token = $2
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(expected)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to revoke active session token")?;
        Ok(result.rows_affected() > 0)
    }
}
