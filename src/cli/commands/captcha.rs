use crate::auth::bot_gate::{DEFAULT_EXPECTED_ACTION, DEFAULT_VERIFY_URL};
use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_CAPTCHA_SECRET: &str = "captcha-secret";
pub const ARG_CAPTCHA_VERIFY_URL: &str = "captcha-verify-url";
pub const ARG_CAPTCHA_MIN_SCORE: &str = "captcha-min-score";
pub const ARG_CAPTCHA_ACTION: &str = "captcha-action";
pub const ARG_CAPTCHA_TIMEOUT_SECONDS: &str = "captcha-timeout-seconds";
pub const ARG_CAPTCHA_BYPASS: &str = "captcha-bypass";

/// Scores are probabilities in `[0.0, 1.0]`.
fn validator_score() -> ValueParser {
    ValueParser::from(move |score: &str| -> std::result::Result<f64, String> {
        let parsed: f64 = score
            .parse()
            .map_err(|_| format!("invalid score: {score}"))?;
        if (0.0..=1.0).contains(&parsed) {
            Ok(parsed)
        } else {
            Err("score must be between 0.0 and 1.0".to_string())
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CAPTCHA_SECRET)
                .long(ARG_CAPTCHA_SECRET)
                .help("Secret key for the captcha verification service")
                .env("WARDEN_CAPTCHA_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_VERIFY_URL)
                .long(ARG_CAPTCHA_VERIFY_URL)
                .help("Captcha verification endpoint")
                .env("WARDEN_CAPTCHA_VERIFY_URL")
                .default_value(DEFAULT_VERIFY_URL),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_MIN_SCORE)
                .long(ARG_CAPTCHA_MIN_SCORE)
                .help("Minimum captcha score accepted for a login")
                .env("WARDEN_CAPTCHA_MIN_SCORE")
                .default_value("0.5")
                .value_parser(validator_score()),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_ACTION)
                .long(ARG_CAPTCHA_ACTION)
                .help("Captcha action name expected for logins")
                .env("WARDEN_CAPTCHA_ACTION")
                .default_value(DEFAULT_EXPECTED_ACTION),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_TIMEOUT_SECONDS)
                .long(ARG_CAPTCHA_TIMEOUT_SECONDS)
                .help("Timeout for the captcha verification call in seconds")
                .env("WARDEN_CAPTCHA_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_BYPASS)
                .long(ARG_CAPTCHA_BYPASS)
                .help("Skip captcha verification (refused in production)")
                .env("WARDEN_CAPTCHA_BYPASS")
                .action(ArgAction::SetTrue),
        )
}
