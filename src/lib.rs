//! # Warden (Login Gate & Session Integrity)
//!
//! `warden` authenticates users for a protected application and re-checks
//! every later request against session hijacking and session fixation.
//!
//! ## Login
//!
//! A login must first pass a captcha check (reCAPTCHA v3 style score and
//! action). Only then is the identity resolved, its lockout state checked and
//! the password verified. Wrong passwords and lockouts return the same generic
//! message so the response never reveals which emails exist.
//!
//! ## Session Tickets
//!
//! A successful login issues one random ticket stored in the server-side
//! session, an `HttpOnly` cookie and the identity row. Protected routes require
//! all three to match. Logging in again invalidates every older ticket for the
//! same identity.
//!
//! ## Audit Trail
//!
//! `LOGIN_SUCCESS`, `LOGIN_FAIL`, `LOCKED_OUT` and `LOGOUT` events are appended
//! to an insert-only table. A failed audit write fails the request.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
