//! Append-only audit trail for authentication events.
//!
//! The sink exposes a single `append`; there is no update or delete. A failed
//! append is returned to the caller as [`AuthError::AuditSink`] and fails the
//! request, because an outcome that was not recorded cannot be proven later.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::{fmt, sync::Arc};
use tracing::{debug, error, Instrument};
use uuid::Uuid;

use super::error::AuthError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    LoginSuccess,
    LoginFail,
    LockedOut,
    Logout,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFail => "LOGIN_FAIL",
            Self::LockedOut => "LOCKED_OUT",
            Self::Logout => "LOGOUT",
        }
    }

    /// The success flag recorded alongside the action.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::LoginSuccess | Self::Logout)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable once built; `created_at` is stamped when the record is created for writing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditRecord {
    pub user_id: Option<Uuid>,
    pub email: String,
    pub action: AuditAction,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(action: AuditAction, user_id: Option<Uuid>, email: &str) -> Self {
        Self {
            user_id,
            email: email.to_string(),
            action,
            success: action.is_success(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// Thin wrapper that stamps records and maps sink failures into [`AuthError`].
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append one record.
    ///
    /// # Errors
    /// Returns [`AuthError::AuditSink`] if the sink rejects the write.
    pub async fn record(
        &self,
        action: AuditAction,
        user_id: Option<Uuid>,
        email: &str,
    ) -> Result<(), AuthError> {
        let record = AuditRecord::new(action, user_id, email);
        match self.sink.append(&record).await {
            Ok(()) => {
                debug!(action = %action, user_id = ?user_id, "audit record appended");
                Ok(())
            }
            Err(err) => {
                error!(action = %action, "Failed to append audit record: {err:#}");
                Err(AuthError::AuditSink(err))
            }
        }
    }
}

impl fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}

/// Postgres sink over the `audit_log` table; insert only.
#[derive(Clone, Debug)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let query = r"
            INSERT INTO audit_log (user_id, email, action, is_success, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.user_id)
            .bind(&record.email)
            .bind(record.action.as_str())
            .bind(record.success)
            .bind(record.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert audit record")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _record: &AuditRecord) -> Result<()> {
            Err(anyhow!("sink offline"))
        }
    }

    #[test]
    fn success_flag_follows_action() {
        assert!(AuditAction::LoginSuccess.is_success());
        assert!(AuditAction::Logout.is_success());
        assert!(!AuditAction::LoginFail.is_success());
        assert!(!AuditAction::LockedOut.is_success());
    }

    #[test]
    fn action_displays_as_screaming_snake_case() {
        assert_eq!(AuditAction::LockedOut.to_string(), "LOCKED_OUT");
        assert_eq!(AuditAction::LoginFail.to_string(), "LOGIN_FAIL");
    }

    #[test]
    fn record_keeps_attempted_email_without_user() {
        let record = AuditRecord::new(AuditAction::LoginFail, None, "ghost@example.com");
        assert_eq!(record.user_id, None);
        assert_eq!(record.email, "ghost@example.com");
        assert!(!record.success);
    }

    #[tokio::test]
    async fn sink_failure_is_surfaced() {
        let trail = AuditTrail::new(Arc::new(FailingSink));
        let result = trail
            .record(AuditAction::LoginSuccess, Some(Uuid::new_v4()), "a@example.com")
            .await;
        assert!(matches!(result, Err(AuthError::AuditSink(_))));
    }
}
