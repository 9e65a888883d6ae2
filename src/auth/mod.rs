//! Authentication session integrity.
//!
//! This module owns the login state machine, the triple-bound session ticket,
//! the append-only audit trail and the captcha gate in front of credential
//! checks. Identity rows and audit storage are collaborators behind the
//! [`UserDirectory`] and [`AuditSink`] traits.
//!
//! ## Session tickets
//!
//! A successful login draws one random value. The raw value goes into an
//! `HttpOnly; Secure; SameSite=Strict` cookie; its SHA-256 digest goes into the
//! server-side session and the identity row. Every protected request must
//! present a cookie whose digest equals both stored digests. A new login
//! overwrites the persisted digest, so only the most recent login for an
//! identity stays valid.
//!
//! ## Lockout
//!
//! - **Threshold:** 3 failed credential checks (configurable).
//! - **Window:** 60 seconds (configurable). No credential check runs while locked.
//!
//! ## Concurrency
//!
//! Nothing here takes a lock. Per-identity consistency relies on every
//! [`UserDirectory`] call being atomic for the row it touches.

pub mod audit;
pub mod bot_gate;
pub mod directory;
pub mod error;
pub mod guard;
pub mod lockout;
pub mod login;
pub mod session;
mod state;
mod utils;

pub use audit::{AuditAction, AuditRecord, AuditSink, AuditTrail, PgAuditSink};
pub use bot_gate::{BotGate, CaptchaConfig, CaptchaRejection, CaptchaVerdict};
pub use directory::{Identity, PgUserDirectory, UserDirectory};
pub use error::AuthError;
pub use guard::{AuthenticatedUser, DenyReason, GuardDecision};
pub use lockout::LockoutPolicy;
pub use login::{LoginAttempt, LoginOutcome, LogoutOutcome};
pub use session::{MemorySessionStore, PgSessionStore, SessionBackend, SessionBinder, SessionStore};
pub use state::{
    AuthConfig, AuthState, Environment, MAX_SESSION_IDLE_SECONDS, MAX_TICKET_TTL_SECONDS,
};
pub(crate) use utils::{extract_client_ip, extract_cookie, normalize_email, valid_email};

#[cfg(test)]
pub(crate) mod tests;
