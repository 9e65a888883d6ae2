use crate::auth::{lockout::MAX_WINDOW_SECONDS, MAX_SESSION_IDLE_SECONDS, MAX_TICKET_TTL_SECONDS};
use clap::{Arg, Command};

pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_LOCKOUT_THRESHOLD: &str = "lockout-threshold";
pub const ARG_LOCKOUT_WINDOW_SECONDS: &str = "lockout-window-seconds";
pub const ARG_TICKET_TTL_SECONDS: &str = "ticket-ttl-seconds";
pub const ARG_SESSION_IDLE_SECONDS: &str = "session-idle-seconds";
pub const ARG_SESSION_STORE: &str = "session-store";

pub fn with_args(command: Command) -> Command {
    let command = with_environment_args(command);
    let command = with_lockout_args(command);
    with_session_args(command)
}

fn with_environment_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment")
                .env("WARDEN_ENVIRONMENT")
                .default_value("production")
                .value_parser(["production", "staging", "development"]),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL allowed by CORS")
                .env("WARDEN_FRONTEND_BASE_URL")
                .default_value("https://warden.dev"),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_THRESHOLD)
                .long(ARG_LOCKOUT_THRESHOLD)
                .help("Failed logins before an account is locked")
                .env("WARDEN_LOCKOUT_THRESHOLD")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_WINDOW_SECONDS)
                .long(ARG_LOCKOUT_WINDOW_SECONDS)
                .help("How long a locked account stays locked, in seconds")
                .env("WARDEN_LOCKOUT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_WINDOW_SECONDS)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TICKET_TTL_SECONDS)
                .long(ARG_TICKET_TTL_SECONDS)
                .help("Absolute lifetime of a session ticket in seconds")
                .env("WARDEN_TICKET_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TICKET_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_SESSION_IDLE_SECONDS)
                .long(ARG_SESSION_IDLE_SECONDS)
                .help("Idle timeout of a server-side session in seconds")
                .env("WARDEN_SESSION_IDLE_SECONDS")
                .default_value("1200")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_SESSION_IDLE_SECONDS)),
        )
        .arg(
            Arg::new(ARG_SESSION_STORE)
                .long(ARG_SESSION_STORE)
                .help("Where server-side sessions are kept")
                .env("WARDEN_SESSION_STORE")
                .default_value("postgres")
                .value_parser(["postgres", "memory"]),
        )
}
