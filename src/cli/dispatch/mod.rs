use crate::{
    auth::{AuthConfig, CaptchaConfig, Environment, SessionBackend},
    cli::{
        actions::{server, Action},
        commands::{auth, captcha},
    },
};
use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::time::Duration;

/// Build the action from parsed arguments.
///
/// # Errors
/// Returns an error if a required argument is missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .ok_or_else(|| anyhow!("missing required argument: --dsn"))?;

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn,
        auth_config: auth_config(matches)?,
    }))
}

fn auth_config(matches: &clap::ArgMatches) -> Result<AuthConfig> {
    let environment: Environment = matches
        .get_one::<String>(auth::ARG_ENVIRONMENT)
        .map_or("production", String::as_str)
        .parse()?;

    let frontend_base_url = matches
        .get_one::<String>(auth::ARG_FRONTEND_BASE_URL)
        .cloned()
        .unwrap_or_else(|| "https://warden.dev".to_string());

    let mut config = AuthConfig::new(frontend_base_url)
        .with_environment(environment)
        .with_captcha(captcha_config(matches));

    if let (Some(threshold), Some(window)) = (
        matches.get_one::<u32>(auth::ARG_LOCKOUT_THRESHOLD),
        matches.get_one::<i64>(auth::ARG_LOCKOUT_WINDOW_SECONDS),
    ) {
        config = config.with_lockout(*threshold, *window);
    }
    if let Some(ttl) = matches.get_one::<i64>(auth::ARG_TICKET_TTL_SECONDS) {
        config = config.with_ticket_ttl_seconds(*ttl);
    }
    if let Some(idle) = matches.get_one::<u64>(auth::ARG_SESSION_IDLE_SECONDS) {
        config = config.with_session_idle_seconds(*idle);
    }
    if let Some(backend) = matches.get_one::<String>(auth::ARG_SESSION_STORE) {
        config = config.with_session_backend(backend.parse::<SessionBackend>()?);
    }

    Ok(config)
}

fn captcha_config(matches: &clap::ArgMatches) -> CaptchaConfig {
    let mut config = CaptchaConfig::new()
        .with_secret(
            matches
                .get_one::<String>(captcha::ARG_CAPTCHA_SECRET)
                .map(|secret| SecretString::from(secret.clone())),
        )
        .with_bypass(matches.get_flag(captcha::ARG_CAPTCHA_BYPASS));

    if let Some(url) = matches.get_one::<String>(captcha::ARG_CAPTCHA_VERIFY_URL) {
        config = config.with_verify_url(url.clone());
    }
    if let Some(score) = matches.get_one::<f64>(captcha::ARG_CAPTCHA_MIN_SCORE) {
        config = config.with_min_score(*score);
    }
    if let Some(action) = matches.get_one::<String>(captcha::ARG_CAPTCHA_ACTION) {
        config = config.with_expected_action(action.clone());
    }
    if let Some(seconds) = matches.get_one::<u64>(captcha::ARG_CAPTCHA_TIMEOUT_SECONDS) {
        config = config.with_timeout(Duration::from_secs(*seconds));
    }
    config
}
