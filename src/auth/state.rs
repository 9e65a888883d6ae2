//! Auth configuration and the shared state handed to handlers.

use anyhow::{anyhow, Result};
use chrono::Duration;
use std::{fmt, str::FromStr, sync::Arc};

use super::{
    audit::{AuditSink, AuditTrail},
    bot_gate::{BotGate, CaptchaConfig},
    directory::UserDirectory,
    lockout::LockoutPolicy,
    session::{SessionBackend, SessionBinder, SessionStore},
};

const DEFAULT_LOCKOUT_THRESHOLD: u32 = 3;
const DEFAULT_LOCKOUT_WINDOW_SECONDS: i64 = 60;
const DEFAULT_TICKET_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_SESSION_IDLE_SECONDS: u64 = 20 * 60;

/// Longest accepted ticket lifetime: one day.
pub const MAX_TICKET_TTL_SECONDS: i64 = 24 * 60 * 60;
/// Longest accepted session idle timeout: one day.
pub const MAX_SESSION_IDLE_SECONDS: u64 = 24 * 60 * 60;

/// Deployment environment. Only non-production environments may relax checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Development,
}

impl Environment {
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" | "dev" => Ok(Self::Development),
            other => Err(anyhow!("unknown environment: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    environment: Environment,
    frontend_base_url: String,
    lockout_threshold: u32,
    lockout_window_seconds: i64,
    ticket_ttl_seconds: i64,
    session_idle_seconds: u64,
    session_backend: SessionBackend,
    captcha: CaptchaConfig,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            environment: Environment::default(),
            frontend_base_url,
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window_seconds: DEFAULT_LOCKOUT_WINDOW_SECONDS,
            ticket_ttl_seconds: DEFAULT_TICKET_TTL_SECONDS,
            session_idle_seconds: DEFAULT_SESSION_IDLE_SECONDS,
            session_backend: SessionBackend::default(),
            captcha: CaptchaConfig::default(),
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Range checks happen in [`AuthState::new`].
    #[must_use]
    pub fn with_lockout(mut self, threshold: u32, window_seconds: i64) -> Self {
        self.lockout_threshold = threshold;
        self.lockout_window_seconds = window_seconds;
        self
    }

    #[must_use]
    pub fn with_ticket_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ticket_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_idle_seconds(mut self, seconds: u64) -> Self {
        self.session_idle_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_backend(mut self, backend: SessionBackend) -> Self {
        self.session_backend = backend;
        self
    }

    #[must_use]
    pub fn with_captcha(mut self, captcha: CaptchaConfig) -> Self {
        self.captcha = captcha;
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_window_seconds(&self) -> i64 {
        self.lockout_window_seconds
    }

    #[must_use]
    pub fn ticket_ttl_seconds(&self) -> i64 {
        self.ticket_ttl_seconds
    }

    #[must_use]
    pub fn session_idle_seconds(&self) -> u64 {
        self.session_idle_seconds
    }

    #[must_use]
    pub fn session_backend(&self) -> SessionBackend {
        self.session_backend
    }

    #[must_use]
    pub fn captcha(&self) -> &CaptchaConfig {
        &self.captcha
    }
}

/// Everything the login pipeline, logout and the request guard need.
pub struct AuthState {
    config: AuthConfig,
    directory: Arc<dyn UserDirectory>,
    audit: AuditTrail,
    bot_gate: BotGate,
    sessions: SessionBinder,
    lockout: LockoutPolicy,
}

impl AuthState {
    /// # Errors
    /// Returns an error if a duration is out of range or the bot gate cannot
    /// be built for the configured environment.
    pub fn new(
        config: AuthConfig,
        directory: Arc<dyn UserDirectory>,
        audit_sink: Arc<dyn AuditSink>,
        session_store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let lockout =
            LockoutPolicy::from_seconds(config.lockout_threshold(), config.lockout_window_seconds())?;
        let ticket_ttl = ticket_ttl(config.ticket_ttl_seconds())?;
        if !(1..=MAX_SESSION_IDLE_SECONDS).contains(&config.session_idle_seconds()) {
            return Err(anyhow!(
                "session idle timeout must be between 1 and {MAX_SESSION_IDLE_SECONDS} seconds, got {}",
                config.session_idle_seconds()
            ));
        }
        let bot_gate = BotGate::new(config.captcha().clone(), config.environment())?;
        Ok(Self {
            config,
            directory,
            audit: AuditTrail::new(audit_sink),
            bot_gate,
            sessions: SessionBinder::new(session_store, ticket_ttl),
            lockout,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    #[must_use]
    pub fn bot_gate(&self) -> &BotGate {
        &self.bot_gate
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionBinder {
        &self.sessions
    }

    #[must_use]
    pub fn lockout(&self) -> LockoutPolicy {
        self.lockout
    }
}

fn ticket_ttl(seconds: i64) -> Result<Duration> {
    if !(1..=MAX_TICKET_TTL_SECONDS).contains(&seconds) {
        return Err(anyhow!(
            "ticket lifetime must be between 1 and {MAX_TICKET_TTL_SECONDS} seconds, got {seconds}"
        ));
    }
    Duration::try_seconds(seconds).ok_or_else(|| anyhow!("ticket lifetime out of range: {seconds}"))
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
