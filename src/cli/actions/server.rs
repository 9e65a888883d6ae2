use crate::{api, auth::AuthConfig};
use anyhow::Result;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth_config: AuthConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the auth configuration is
/// rejected, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    api::new(args.port, args.dsn, args.auth_config).await
}

fn log_startup_args(args: &Args) {
    let config = &args.auth_config;
    let captcha = config.captcha();
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("environment", config.environment().to_string()),
        ("frontend_base_url", config.frontend_base_url().to_string()),
        ("lockout_threshold", config.lockout_threshold().to_string()),
        (
            "lockout_window_seconds",
            config.lockout_window_seconds().to_string(),
        ),
        ("ticket_ttl_seconds", config.ticket_ttl_seconds().to_string()),
        ("session_idle_seconds", config.session_idle_seconds().to_string()),
        ("session_store", config.session_backend().to_string()),
        ("captcha_secret_set", captcha.has_secret().to_string()),
        ("captcha_verify_url", captcha.verify_url().to_string()),
        ("captcha_min_score", captcha.min_score().to_string()),
        ("captcha_action", captcha.expected_action().to_string()),
        ("captcha_bypass", captcha.bypass().to_string()),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} ({})\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}
