use crate::auth::{
    token::{DEFAULT_TTL_HOURS, MAX_TTL_HOURS},
    TokenIssuer,
};
use crate::throttle::{
    ThrottleConfig, DEFAULT_LOCKOUT_MINUTES, DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW_MINUTES,
    MAX_MINUTES,
};
use clap::{Arg, ArgMatches, Command};

pub const ARG_MAX_ATTEMPTS: &str = "login-max-attempts";
pub const ARG_WINDOW: &str = "login-window";
pub const ARG_LOCKOUT: &str = "login-lockout";
pub const ARG_TOKEN_TTL: &str = "token-ttl";

fn read_u32(matches: &ArgMatches, id: &str, default: u32) -> u32 {
    matches.get_one::<u32>(id).copied().unwrap_or(default)
}

#[must_use]
pub fn throttle(matches: &ArgMatches) -> ThrottleConfig {
    ThrottleConfig::new()
        .with_max_attempts(read_u32(matches, ARG_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS))
        .with_window_minutes(read_u32(matches, ARG_WINDOW, DEFAULT_WINDOW_MINUTES))
        .with_lockout_minutes(read_u32(matches, ARG_LOCKOUT, DEFAULT_LOCKOUT_MINUTES))
}

#[must_use]
pub fn tokens(matches: &ArgMatches) -> TokenIssuer {
    TokenIssuer::new().with_ttl_hours(read_u32(matches, ARG_TOKEN_TTL, DEFAULT_TTL_HOURS))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_ATTEMPTS)
                .long(ARG_MAX_ATTEMPTS)
                .help("Failed logins within the window before the key is locked")
                .env("GATEKEEP_LOGIN_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_WINDOW)
                .long(ARG_WINDOW)
                .help("Sliding window in minutes for counting failed logins")
                .env("GATEKEEP_LOGIN_WINDOW")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(1..=i64::from(MAX_MINUTES))),
        )
        .arg(
            Arg::new(ARG_LOCKOUT)
                .long(ARG_LOCKOUT)
                .help("Lock duration in minutes")
                .env("GATEKEEP_LOGIN_LOCKOUT")
                .default_value("15")
                .value_parser(clap::value_parser!(u32).range(1..=i64::from(MAX_MINUTES))),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL)
                .long(ARG_TOKEN_TTL)
                .help("Access token lifetime in hours")
                .env("GATEKEEP_TOKEN_TTL")
                .default_value("24")
                .value_parser(clap::value_parser!(u32).range(1..=i64::from(MAX_TTL_HOURS))),
        )
}
