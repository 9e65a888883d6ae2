//! HTTP handlers.
//!
//! Protected handlers read the [`AuthenticatedUser`](crate::auth::AuthenticatedUser)
//! that the request guard attached to the request; they never run without it.

pub mod auth;
pub mod health;
pub mod me;
pub mod root;
