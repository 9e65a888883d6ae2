//! Human-verification gate checked before any credential work.
//!
//! One form-encoded `POST {secret, response}` to the verification endpoint per
//! login submission, no retry. Every failure mode, including network trouble,
//! rejects. The only way past the gate without a verdict is the bypass mode,
//! which [`BotGate::new`] refuses to build for [`Environment::Production`].

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{fmt, time::Duration};
use tracing::{debug, info_span, warn, Instrument};

use super::state::Environment;

pub const DEFAULT_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
pub const DEFAULT_MIN_SCORE: f64 = 0.5;
pub const DEFAULT_EXPECTED_ACTION: &str = "login";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone)]
pub struct CaptchaConfig {
    secret: Option<SecretString>,
    verify_url: String,
    min_score: f64,
    expected_action: String,
    timeout: Duration,
    bypass: bool,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            secret: None,
            verify_url: DEFAULT_VERIFY_URL.to_string(),
            min_score: DEFAULT_MIN_SCORE,
            expected_action: DEFAULT_EXPECTED_ACTION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            bypass: false,
        }
    }
}

impl CaptchaConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(mut self, secret: Option<SecretString>) -> Self {
        self.secret = secret.filter(|value| !value.expose_secret().trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_verify_url(mut self, url: String) -> Self {
        self.verify_url = url;
        self
    }

    #[must_use]
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    #[must_use]
    pub fn with_expected_action(mut self, action: String) -> Self {
        self.expected_action = action;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    #[must_use]
    pub fn expected_action(&self) -> &str {
        &self.expected_action
    }

    #[must_use]
    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    #[must_use]
    pub fn bypass(&self) -> bool {
        self.bypass
    }

    #[must_use]
    pub fn verify_url(&self) -> &str {
        &self.verify_url
    }
}

impl fmt::Debug for CaptchaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptchaConfig")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("verify_url", &self.verify_url)
            .field("min_score", &self.min_score)
            .field("expected_action", &self.expected_action)
            .field("timeout", &self.timeout)
            .field("bypass", &self.bypass)
            .finish()
    }
}

/// Body returned by the verification endpoint.
#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaptchaRejection {
    MissingToken,
    MissingSecret,
    /// Verification endpoint answered with a non-2xx status.
    HttpStatus(u16),
    Unavailable,
    TimedOut,
    /// Body could not be read as a verification response.
    Malformed,
    NotVerified { error_codes: Vec<String> },
    ActionMismatch { actual: Option<String> },
    ScoreTooLow { score: f64 },
}

impl CaptchaRejection {
    /// Detailed reason, for logs and the operational layer.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::MissingToken => "Captcha token missing.".to_string(),
            Self::MissingSecret => "Captcha secret key missing.".to_string(),
            Self::HttpStatus(status) => format!("Captcha verification failed (HTTP {status})."),
            Self::Unavailable => "Captcha service is unavailable. Please try again.".to_string(),
            Self::TimedOut => "Captcha verification timed out. Please try again.".to_string(),
            Self::Malformed => "Captcha verification failed (unreadable response).".to_string(),
            Self::NotVerified { error_codes } => {
                format!("Captcha verification failed ({}).", error_codes.join(", "))
            }
            Self::ActionMismatch { .. } => "Captcha action mismatch.".to_string(),
            Self::ScoreTooLow { score } => format!("Captcha score too low ({score:.2})."),
        }
    }

    /// Network trouble reaching the verifier, as opposed to a negative verdict.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Unavailable | Self::TimedOut)
    }

    /// Message safe to show to the caller.
    ///
    /// Input and network problems are actionable; policy verdicts stay generic.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::MissingToken => "Captcha token missing.",
            Self::Unavailable => "Captcha service is unavailable. Please try again.",
            Self::TimedOut => "Captcha verification timed out. Please try again.",
            _ => "Captcha verification failed.",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaptchaVerdict {
    Accepted { score: f64 },
    /// Non-production bypass; never produced in production.
    Bypassed,
    Rejected(CaptchaRejection),
}

impl CaptchaVerdict {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Accepted { .. } => "OK".to_string(),
            Self::Bypassed => "OK (bypass)".to_string(),
            Self::Rejected(rejection) => rejection.reason(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateMode {
    Enforce,
    Bypass,
}

#[derive(Debug)]
pub struct BotGate {
    config: CaptchaConfig,
    mode: GateMode,
    client: Client,
}

impl BotGate {
    /// Build the gate for the given deployment environment.
    ///
    /// # Errors
    /// Returns an error if bypass is requested in production, the verify URL is
    /// invalid, or the HTTP client cannot be built.
    pub fn new(config: CaptchaConfig, environment: Environment) -> Result<Self> {
        let mode = if config.bypass {
            if environment.is_production() {
                return Err(anyhow!(
                    "captcha bypass cannot be enabled in the production environment"
                ));
            }
            warn!(environment = %environment, "captcha verification is bypassed");
            GateMode::Bypass
        } else {
            GateMode::Enforce
        };

        url::Url::parse(&config.verify_url)
            .with_context(|| format!("Invalid captcha verify URL: {}", config.verify_url))?;

        if mode == GateMode::Enforce && !config.has_secret() {
            warn!("captcha secret is not configured; every login will be rejected");
        }

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context("Failed to build captcha HTTP client")?;

        Ok(Self {
            config,
            mode,
            client,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CaptchaConfig {
        &self.config
    }

    #[must_use]
    pub fn is_bypassed(&self) -> bool {
        self.mode == GateMode::Bypass
    }

    /// Verify a client proof token for `expected_action`.
    pub async fn verify(&self, proof_token: Option<&str>, expected_action: &str) -> CaptchaVerdict {
        if self.mode == GateMode::Bypass {
            warn!("captcha bypassed");
            return CaptchaVerdict::Bypassed;
        }

        let Some(secret) = &self.config.secret else {
            return CaptchaVerdict::Rejected(CaptchaRejection::MissingSecret);
        };

        let Some(token) = proof_token.map(str::trim).filter(|token| !token.is_empty()) else {
            return CaptchaVerdict::Rejected(CaptchaRejection::MissingToken);
        };

        let span = info_span!(
            "captcha.verify",
            http.method = "POST",
            url = %self.config.verify_url,
            token_len = token.len()
        );
        let response = match self.call(secret, token).instrument(span).await {
            Ok(response) => response,
            Err(rejection) => return CaptchaVerdict::Rejected(rejection),
        };

        self.judge(&response, expected_action)
    }

    async fn call(
        &self,
        secret: &SecretString,
        token: &str,
    ) -> Result<SiteVerifyResponse, CaptchaRejection> {
        let form = [("secret", secret.expose_secret()), ("response", token)];
        let response = self
            .client
            .post(&self.config.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "captcha verification endpoint returned an error");
            return Err(CaptchaRejection::HttpStatus(status.as_u16()));
        }

        response
            .json::<SiteVerifyResponse>()
            .await
            .map_err(|err| classify_transport_error(&err))
    }

    fn judge(&self, response: &SiteVerifyResponse, expected_action: &str) -> CaptchaVerdict {
        debug!(
            success = response.success,
            score = ?response.score,
            action = ?response.action,
            hostname = ?response.hostname,
            "captcha verification response"
        );

        if !response.success {
            warn!(error_codes = ?response.error_codes, "captcha not verified");
            return CaptchaVerdict::Rejected(CaptchaRejection::NotVerified {
                error_codes: response.error_codes.clone(),
            });
        }

        let action_matches = response
            .action
            .as_deref()
            .is_some_and(|action| action.eq_ignore_ascii_case(expected_action));
        if !action_matches {
            warn!(expected = expected_action, actual = ?response.action, "captcha action mismatch");
            return CaptchaVerdict::Rejected(CaptchaRejection::ActionMismatch {
                actual: response.action.clone(),
            });
        }

        // A missing score cannot prove anything, so it scores zero.
        let score = response.score.unwrap_or(0.0);
        if score < self.config.min_score {
            warn!(score, min_score = self.config.min_score, "captcha score too low");
            return CaptchaVerdict::Rejected(CaptchaRejection::ScoreTooLow { score });
        }

        CaptchaVerdict::Accepted { score }
    }
}

fn classify_transport_error(err: &reqwest::Error) -> CaptchaRejection {
    if err.is_timeout() {
        warn!("captcha verification timed out: {err}");
        CaptchaRejection::TimedOut
    } else if err.is_decode() {
        warn!("captcha verification response unreadable: {err}");
        CaptchaRejection::Malformed
    } else {
        warn!("captcha verification service unreachable: {err}");
        CaptchaRejection::Unavailable
    }
}
